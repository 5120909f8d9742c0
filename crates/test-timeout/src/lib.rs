//! `#[timed_test]`: a test attribute that fails the test once a wall-clock
//! deadline passes.
//!
//! Async tests get their own current-thread Tokio runtime. With `paused`, the
//! runtime starts with a paused clock, so virtual sleeps finish instantly while
//! a hung future still trips the real deadline.
//!
//! ```ignore
//! #[timed_test(secs = 10)]
//! async fn reconnects() { /* ... */ }
//!
//! #[timed_test(secs = 5, paused)]
//! async fn backs_off() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_SECS: u64 = 30;

struct Options {
    secs: u64,
    paused: bool,
}

#[proc_macro_attribute]
pub fn timed_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut options = Options {
        secs: DEFAULT_SECS,
        paused: false,
    };
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("secs") {
            let lit: LitInt = meta.value()?.parse()?;
            options.secs = lit.base10_parse()?;
            if options.secs == 0 {
                return Err(meta.error("deadline must be greater than zero"));
            }
            Ok(())
        } else if meta.path.is_ident("paused") {
            options.paused = true;
            Ok(())
        } else {
            Err(meta.error("expected `secs = N` or `paused`"))
        }
    });
    parse_macro_input!(attr with parser);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    let is_async = sig.asyncness.take().is_some();
    if options.paused && !is_async {
        return syn::Error::new_spanned(&sig.ident, "`paused` requires an async test")
            .to_compile_error()
            .into();
    }

    let body = if is_async {
        let paused = if options.paused {
            quote! { .start_paused(true) }
        } else {
            quote! {}
        };
        quote! {
            || {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    #paused
                    .build()
                    .expect("failed to build Tokio runtime")
                    .block_on(async move #block)
            }
        }
    } else {
        quote! { || #block }
    };

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    with_deadline(attrs, vis, sig, body, options.secs).into()
}

/// Runs `body` on its own thread and waits at most `secs` for it.
fn with_deadline(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    body: TokenStream2,
    secs: u64,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            let body = #body;
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded its {}s deadline", #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    }
}

/// `#[test]` and `#[tokio::test(..)]` would run the body a second time.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
