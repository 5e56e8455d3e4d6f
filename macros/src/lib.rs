//! Procedural macros for the winot on-device test harness.
//!
//! `#[tap_test]` registers a function with `winot::testing` so the
//! `device-tests` binary can run it on the radio board and report in TAP
//! format.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Mark a function as a TAP test.
///
/// Supported forms:
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "message fragment")]`
/// - `#[tap_test(skip = "reason")]` reports `# SKIP` without running the body
///
/// ```ignore
/// use winot_macros::tap_test;
///
/// #[tap_test]
/// fn short_frame_goes_out_unfragmented() {
///     let frames: Vec<_> = fragment(&[1, 2, 3]).unwrap().collect();
///     assert_eq!(frames.len(), 1);
/// }
///
/// #[tap_test(should_panic = "too short")]
/// fn truncated_join_is_refused() {
///     JoinRequest::parse(&[1, 2]).expect("too short");
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;
    let returns_result = matches!(fn_output, ReturnType::Type(_, _));

    let mode = match parse_mode(attr) {
        Ok(mode) => mode,
        Err(msg) => {
            return syn::Error::new_spanned(fn_name, msg)
                .to_compile_error()
                .into()
        }
    };

    let register_call = match mode {
        Mode::Run if returns_result => quote! { runner.run(#fn_name_str, #fn_name); },
        Mode::Run => quote! { runner.run_assert(#fn_name_str, #fn_name); },
        Mode::ShouldPanic(None) => {
            quote! { runner.run_should_panic(#fn_name_str, #fn_name, None); }
        }
        Mode::ShouldPanic(Some(msg)) => {
            quote! { runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg)); }
        }
        Mode::Skip(reason) => quote! {
            let _ = #fn_name;
            runner.skip(#fn_name_str, #reason);
        },
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #fn_vis fn #fn_name() #fn_output #fn_block

        ::inventory::submit! {
            ::winot::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::winot::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Mode {
    Run,
    ShouldPanic(Option<String>),
    Skip(String),
}

fn parse_mode(attr: TokenStream) -> Result<Mode, String> {
    if attr.is_empty() {
        return Ok(Mode::Run);
    }

    let meta: Meta =
        syn::parse(attr).map_err(|e| format!("tap_test: unparseable attribute: {}", e))?;

    match meta {
        Meta::Path(p) if p.is_ident("should_panic") => Ok(Mode::ShouldPanic(None)),
        Meta::NameValue(nv) => {
            let value = match nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => s.value(),
                _ => return Err("tap_test: expected a string literal value".to_string()),
            };
            if nv.path.is_ident("should_panic") {
                Ok(Mode::ShouldPanic(Some(value)))
            } else if nv.path.is_ident("skip") {
                Ok(Mode::Skip(value))
            } else {
                Err("tap_test: supported keys are should_panic and skip".to_string())
            }
        }
        _ => Err(
            "tap_test: use #[tap_test], #[tap_test(should_panic)], \
             #[tap_test(should_panic = \"..\")] or #[tap_test(skip = \"..\")]"
                .to_string(),
        ),
    }
}
