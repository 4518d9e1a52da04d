use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that process-local state is torn down regardless of how the test
/// terminates.
///
/// Every test gets a fresh in-memory backend behind a fully ignited server.
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// [`crate::backend::MemoryBackend`] (a handle on the same tables the server
/// uses), and [`crate::store::Stores`].
///
/// `#[backend_test(seeded)]` fills the catalog with example posts and
/// candidates before the server starts.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Seed the backend if requested.
    let maybe_seed = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "seeded" => quote! { backend.seed_example(); },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `seeded`")
                .into_compile_error()
                .into();
        }
        None => quote! {},
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            // These tests enter store code, so enable logging.
            log4rs_test_utils::test_logging::init_logging_once_for(
                ["votesheet_backend"],
                None,
                None,
            );

            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::backend::MemoryBackend,
                crate::store::Stores,
            ) {
                let backend = crate::backend::MemoryBackend::new();

                #maybe_seed

                let rocket = crate::rocket_for_backend(
                    std::sync::Arc::new(backend.clone()),
                    crate::Config::example(),
                );
                let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                    .await
                    .unwrap();
                let stores = rocket_client
                    .rocket()
                    .state::<crate::store::Stores>()
                    .unwrap()
                    .clone();

                (rocket_client, backend, stores)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            fn cleanup(stores: crate::store::Stores) {
                stores.teardown();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, backend, stores) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let backend_mutex = std::sync::Mutex::new(backend);
            let stores_mutex = std::sync::Mutex::new(stores.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let backend = backend_mutex.into_inner().unwrap();
                let stores = stores_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            cleanup(stores);

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut args = vec![];
    let mut seen: Vec<String> = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself
                if let Some(segment) = type_path.path.segments.last() {
                    let type_ident = segment.ident.to_string();
                    let injected = match type_ident.as_str() {
                        "Client" => Some(quote! { rocket_client }),
                        "MemoryBackend" => Some(quote! { backend }),
                        "Stores" => Some(quote! { stores }),
                        _ => None,
                    };
                    if let Some(injected) = injected {
                        if seen.contains(&type_ident) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        seen.push(type_ident);
                        args.push(injected);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `backend_ident: MemoryBackend` or `stores_ident: Stores`",
        ));
    }

    Ok(args)
}
