//! Call-site macros: `log_info!`/`log_warn!`/`log_error!`/`log_debug!`
//! and the level-generic `log!`. Each expands to the same three-step shape:
//! a static level check, a once-per-call-site registration cached in a
//! `static OnceLock<u32>`, and a call into `cnanolog::pack_and_commit`.
//!
//! `syn::parse::{Parse, ParseStream}` parses a comma-separated argument list,
//! `proc_macro::TokenStream` goes in and out, and `quote!` builds the
//! expansion around an `if is_enabled(...) { ... }` wrapper. The call-site
//! shape is printf-style `"fmt", arg, arg, ...` rather than a `key = value`
//! field list, expanded once per level into an `info!`/`warn!`/`error!`/
//! `debug!` macro family.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
  parse::{Parse, ParseStream},
  parse_macro_input, Expr, LitStr, Token,
};

/// `"format string", arg1, arg2, ...` — the call-site shape every macro parses.
struct LogCall {
  format: LitStr,
  args: Vec<Expr>,
}

impl Parse for LogCall {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    let format: LitStr = input.parse()?;
    let mut args = Vec::new();
    while input.peek(Token![,]) {
      input.parse::<Token![,]>()?;
      if input.is_empty() {
        break;
      }
      args.push(input.parse::<Expr>()?);
    }
    Ok(LogCall { format, args })
  }
}

/// `level_expr, "format string", arg1, arg2, ...` — `log!`'s generic form,
/// for custom levels registered via `cnanolog::register_level`.
struct LeveledLogCall {
  level: Expr,
  call: LogCall,
}

impl Parse for LeveledLogCall {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    let level: Expr = input.parse()?;
    input.parse::<Token![,]>()?;
    Ok(LeveledLogCall { level, call: input.parse()? })
  }
}

fn expand(level: proc_macro2::TokenStream, call: &LogCall) -> proc_macro2::TokenStream {
  let format = &call.format;
  let args = &call.args;
  let n = args.len();
  let arg_idents: Vec<_> = (0..n).map(|i| format_ident!("__cnanolog_arg_{i}")).collect();

  quote! {
    {
      if ::cnanolog::is_enabled(#level) {
        static __CNANOLOG_LOG_ID: ::std::sync::OnceLock<u32> = ::std::sync::OnceLock::new();
        #( let #arg_idents = ::cnanolog::IntoArgValue::into_arg_value(#args); )*
        let __cnanolog_args: [::cnanolog::ArgValue; #n] = [ #( #arg_idents ),* ];
        let __cnanolog_id = *__CNANOLOG_LOG_ID.get_or_init(|| {
          let __cnanolog_arg_types: ::std::vec::Vec<::cnanolog::ArgType> =
            __cnanolog_args.iter().map(::cnanolog::ArgValue::arg_type).collect();
          ::cnanolog::register(#level, file!(), line!(), #format, &__cnanolog_arg_types)
        });
        ::cnanolog::pack_and_commit(__cnanolog_id, &__cnanolog_args);
      }
    }
  }
}

macro_rules! level_macro {
  ($name:ident, $level:literal) => {
    #[proc_macro]
    pub fn $name(input: TokenStream) -> TokenStream {
      let call = parse_macro_input!(input as LogCall);
      expand(quote! { $level }, &call).into()
    }
  };
}

level_macro!(log_info, 0u8);
level_macro!(log_warn, 1u8);
level_macro!(log_error, 2u8);
level_macro!(log_debug, 3u8);

/// `log!(level_expr, "format string", args...)`: the
/// only one of this family whose level isn't known until the registration
/// call that follows it at runtime, since custom level values are assigned by
/// `register_level` rather than baked into the macro name.
#[proc_macro]
pub fn log(input: TokenStream) -> TokenStream {
  let leveled = parse_macro_input!(input as LeveledLogCall);
  let level = &leveled.level;
  expand(quote! { #level }, &leveled.call).into()
}

// `expand` and `LogCall::parse` are plain functions over `proc_macro2`/`syn`
// types, so — unlike the `#[proc_macro]` entry points themselves — they're
// directly unit-testable without a downstream crate driving real macro
// invocations (see `cnanolog/tests/macros.rs` for that end-to-end coverage).
#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_format_string_with_no_args() {
    let call: LogCall = syn::parse_str(r#""hello""#).unwrap();
    assert_eq!(call.format.value(), "hello");
    assert!(call.args.is_empty());
  }

  #[test]
  fn parses_format_string_with_trailing_args() {
    let call: LogCall = syn::parse_str(r#""x={} y={}", a, b + 1"#).unwrap();
    assert_eq!(call.format.value(), "x={} y={}");
    assert_eq!(call.args.len(), 2);
  }

  #[test]
  fn tolerates_a_trailing_comma() {
    let call: LogCall = syn::parse_str(r#""x={}", a,"#).unwrap();
    assert_eq!(call.args.len(), 1);
  }

  #[test]
  fn leveled_call_splits_level_from_the_rest() {
    let leveled: LeveledLogCall = syn::parse_str(r#"my_level, "x={}", a"#).unwrap();
    assert_eq!(leveled.call.args.len(), 1);
  }

  #[test]
  fn expansion_guards_argument_evaluation_behind_is_enabled() {
    let call: LogCall = syn::parse_str(r#""x={}", a"#).unwrap();
    let tokens = expand(quote! { 0u8 }, &call).to_string();
    assert!(tokens.contains("is_enabled"));
    assert!(tokens.contains("pack_and_commit"));
    assert!(tokens.contains("OnceLock"));
  }
}
