//! Proc macros for `state-migrate`.
//!
//! - **`#[migration]`** — Attribute macro that wraps a migration function into
//!   a `MigrationStep` implementation.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, punctuated::Punctuated, token::Comma, ItemFn, LitStr, Meta};

/// Parse `"X.Y.Z"` (missing components are 0) at expansion time.
fn parse_version(lit: &LitStr) -> Result<(u64, u64, u64), syn::Error> {
    let raw = lit.value();
    let mut parts = [0u64; 3];
    for (idx, part) in raw.trim().split('.').enumerate() {
        if idx >= parts.len() {
            return Err(syn::Error::new_spanned(
                lit,
                format!("version `{raw}` has more than three components"),
            ));
        }
        parts[idx] = part
            .parse()
            .ok()
            .filter(|_| part.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                syn::Error::new_spanned(lit, format!("version component `{part}` is not numeric"))
            })?;
    }
    Ok((parts[0], parts[1], parts[2]))
}

fn string_value(nv: &syn::MetaNameValue) -> Option<LitStr> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Str(lit),
        ..
    }) = &nv.value
    {
        Some(lit.clone())
    } else {
        None
    }
}

/// Attribute macro that wraps a migration function into a `MigrationStep`.
///
/// The function takes the `StoreState` produced by the previous step and
/// returns the new state, or an error that aborts the run.
///
/// # Attributes
///
/// - `version = "X.Y.Z"` — **Required.** Target schema version.
/// - `description = "..."` — Optional. Shown in logs and listings.
///
/// # Generated Code
///
/// Creates a unit struct `{FnName}Migration` that implements `MigrationStep`,
/// and a `register_{fn_name}` function that returns it boxed for
/// registration.
///
/// # Example
///
/// ```ignore
/// use state_migrate::{migration, StepError, StoreState};
///
/// #[migration(version = "1.1.0", description = "add theme to user")]
/// fn add_theme(mut state: StoreState) -> Result<StoreState, StepError> {
///     state.update_json("app:user", |user| user["theme"] = "light".into())?;
///     Ok(state)
/// }
/// // Generates: AddThemeMigration struct + impl MigrationStep
/// // Generates: fn register_add_theme() -> Box<dyn MigrationStep>
/// ```
#[proc_macro_attribute]
pub fn migration(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let args = parse_macro_input!(attr with Punctuated::<Meta, Comma>::parse_terminated);

    let mut version: Option<LitStr> = None;
    let mut description: Option<LitStr> = None;

    for meta in &args {
        let Meta::NameValue(nv) = meta else {
            return syn::Error::new_spanned(meta, "expected `key = \"value\"`")
                .to_compile_error()
                .into();
        };
        let key = nv
            .path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default();
        let slot = match key.as_str() {
            "version" => &mut version,
            "description" => &mut description,
            _ => {
                return syn::Error::new_spanned(&nv.path, format!("unknown attribute `{key}`"))
                    .to_compile_error()
                    .into();
            }
        };
        match string_value(nv) {
            Some(lit) => *slot = Some(lit),
            None => {
                return syn::Error::new_spanned(&nv.value, format!("`{key}` must be a string"))
                    .to_compile_error()
                    .into();
            }
        }
    }

    let version = match version {
        Some(v) => v,
        None => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                "missing required attribute `version`",
            )
            .to_compile_error()
            .into();
        }
    };

    let (major, minor, patch) = match parse_version(&version) {
        Ok(parts) => parts,
        Err(e) => return e.to_compile_error().into(),
    };

    if input.sig.inputs.len() != 1 {
        return syn::Error::new_spanned(
            &input.sig,
            "migration function must take exactly one argument (the state)",
        )
        .to_compile_error()
        .into();
    }

    if let syn::ReturnType::Default = input.sig.output {
        return syn::Error::new_spanned(
            &input.sig,
            "migration function must return Result<StoreState, StepError>",
        )
        .to_compile_error()
        .into();
    }

    let fn_name = &input.sig.ident;

    let description_body = match &description {
        Some(lit) => quote! { Some(#lit) },
        None => quote! { None },
    };

    // Generate struct name: snake_case -> PascalCase + "Migration"
    let struct_name = {
        let name = fn_name.to_string();
        let pascal: String = name
            .split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect();
        syn::Ident::new(&format!("{pascal}Migration"), fn_name.span())
    };

    let register_fn = syn::Ident::new(&format!("register_{fn_name}"), fn_name.span());

    let expanded = quote! {
        #input

        /// Auto-generated migration step struct.
        pub struct #struct_name;

        impl state_migrate::MigrationStep for #struct_name {
            fn target_version(&self) -> state_migrate::Version {
                state_migrate::Version::new(#major, #minor, #patch)
            }

            fn description(&self) -> Option<&str> {
                #description_body
            }

            fn apply(
                &self,
                state: state_migrate::StoreState,
            ) -> Result<state_migrate::StoreState, state_migrate::StepError> {
                #fn_name(state).map_err(Into::into)
            }
        }

        /// Box this migration step for registration.
        pub fn #register_fn() -> Box<dyn state_migrate::MigrationStep> {
            Box::new(#struct_name)
        }
    };

    expanded.into()
}
