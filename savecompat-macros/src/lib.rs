use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, Fields, Ident, ImplItem, ImplItemFn, ItemImpl,
    Stmt, Variant, Visibility,
};

/// Procedural macro that turns an enum into a savecompat error type
///
/// This macro automatically:
/// 1. Adds `#[derive(Debug, thiserror::Error, uniffi::Error)]` and `#[uniffi(flat_error)]`
/// 2. Adds a `Generic { message: String }` variant if not already present
/// 3. Implements `From<anyhow::Error>` for the error type, keeping the cause chain
/// 4. Generates `code()`, a stable `SCREAMING_SNAKE` code per variant for log lines
///
/// # Usage
///
/// ```rust,ignore
/// #[savecompat_error]
/// pub enum LedgerError {
///     #[error("ledger entry {package_id} is malformed")]
///     MalformedEntry { package_id: String },
/// }
///
/// assert_eq!(err.code(), "MALFORMED_ENTRY");
/// ```
#[proc_macro_attribute]
pub fn savecompat_error(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(
            &input,
            "savecompat_error can only be applied to enums",
        )
        .to_compile_error()
        .into();
    };

    let enum_name = &input.ident;
    let visibility = &input.vis;
    let generics = &input.generics;

    // Derives and uniffi attributes are regenerated below.
    let attrs: Vec<_> = input
        .attrs
        .iter()
        .filter(|attr| !attr.path().is_ident("derive") && !attr.path().is_ident("uniffi"))
        .collect();

    let mut variants = data_enum.variants.clone();
    if !variants.iter().any(|variant| variant.ident == "Generic") {
        let generic_variant: Variant = syn::parse_quote! {
            /// A generic error that can wrap any anyhow error.
            #[error("Generic error: {message}")]
            Generic {
                /// The error message from the wrapped error.
                message: String
            }
        };
        variants.push(generic_variant);
    }

    let code_arms = variants.iter().map(|variant| {
        let ident = &variant.ident;
        let code = screaming_snake(ident);
        match &variant.fields {
            Fields::Named(_) => quote! { Self::#ident { .. } => #code },
            Fields::Unnamed(_) => quote! { Self::#ident(..) => #code },
            Fields::Unit => quote! { Self::#ident => #code },
        }
    });

    quote! {
        #[derive(Debug, thiserror::Error, uniffi::Error)]
        #[uniffi(flat_error)]
        #(#attrs)*
        #visibility enum #enum_name #generics {
            #variants
        }

        impl #generics From<anyhow::Error> for #enum_name #generics {
            fn from(err: anyhow::Error) -> Self {
                let mut message = err.to_string();
                let chain: Vec<String> = err.chain().skip(1).map(|e| e.to_string()).collect();
                if !chain.is_empty() {
                    message.push_str(" (caused by: ");
                    message.push_str(&chain.join(" -> "));
                    message.push(')');
                }
                Self::Generic { message }
            }
        }

        impl #generics #enum_name #generics {
            /// Stable machine-readable code for this error, used in structured log lines.
            #[must_use]
            pub const fn code(&self) -> &'static str {
                match self {
                    #(#code_arms,)*
                }
            }

            /// Convert an anyhow::Result to a Result with this error type
            pub fn from_anyhow_result<T>(result: anyhow::Result<T>) -> Result<T, Self> {
                result.map_err(Self::from)
            }
        }
    }
    .into()
}

/// Procedural macro that wraps `uniffi::export` and injects a logging context
///
/// Every `pub fn` of the impl block starts with
/// `let _savecompat_logger_ctx = crate::primitives::logger::LogContext::new("TypeName");`
/// so that the crate logging macros prefix their output with `[TypeName]` while the
/// call is running. Private helpers are left untouched.
///
/// # Usage
///
/// ```rust,ignore
/// #[savecompat_export]
/// impl MigrationRegistry {
///     pub fn len(&self) -> u32 {
///         // _savecompat_logger_ctx is injected here
///         debug!("prefixed with [MigrationRegistry]");
///         0
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn savecompat_export(args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);
    let type_name = impl_type_name(&input_impl);

    let items = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method) if matches!(method.vis, Visibility::Public(_)) => {
                let mut method = method.clone();
                inject_logging_context(&mut method, &type_name);
                ImplItem::Fn(method)
            }
            other => other.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items,
        ..input_impl
    };
    let args = proc_macro2::TokenStream::from(args);

    quote! {
        #[uniffi::export(#args)]
        #new_impl
    }
    .into()
}

/// Last path segment of the impl's self type, used as the logging context name.
fn impl_type_name(input_impl: &ItemImpl) -> String {
    match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map_or_else(|| "Unknown".to_string(), |segment| segment.ident.to_string()),
        _ => "Unknown".to_string(),
    }
}

fn inject_logging_context(method: &mut ImplItemFn, type_name: &str) {
    let context_stmt: Stmt = syn::parse_quote! {
        let _savecompat_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
    };
    method.block.stmts.insert(0, context_stmt);
}

/// `DuplicateRegistration` -> `DUPLICATE_REGISTRATION`
fn screaming_snake(ident: &Ident) -> String {
    let name = ident.to_string();
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for ch in name.chars() {
        if ch.is_uppercase()
            && previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit())
        {
            out.push('_');
        }
        out.extend(ch.to_uppercase());
        previous = Some(ch);
    }
    out
}
