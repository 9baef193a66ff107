//! Attribute macros for the filament runtime.
//!
//! `#[filament::main]` and `#[filament::test]` turn an `async fn` into a
//! plain function that builds a [`Runtime`] and blocks on the body. Both
//! accept `worker_threads = N`.
//!
//! [`Runtime`]: https://docs.rs/filament/latest/filament/struct.Runtime.html

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, false).unwrap_or_else(compile_error)
}

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, true).unwrap_or_else(compile_error)
}

fn expand(attr: TokenStream, item: TokenStream, test: bool) -> Result<TokenStream, String> {
    let worker_threads = parse_worker_threads(&attr.to_string())?;
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    let Some(async_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    else {
        return Err("the function must be declared `async fn`".to_owned());
    };
    tokens.remove(async_pos);

    let Some(pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return Err("expected a function body".to_owned());
    };

    let body = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let mut builder = String::from("::filament::RuntimeBuilder::new()");
    if let Some(n) = worker_threads {
        builder.push_str(&format!(".worker_threads({n})"));
    }

    let new_body = format!(
        "{{
            let runtime = {builder}
                .build()
                .expect(\"failed to start the filament runtime\");
            runtime.block_on(async move {{ {body} }})
        }}"
    );
    let new_body: TokenStream = new_body
        .parse()
        .map_err(|err| format!("could not expand the function body: {err}"))?;
    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, new_body));

    let mut output = Vec::new();
    if test {
        output.extend("#[test]".parse::<TokenStream>().unwrap());
    }
    output.extend(tokens);

    Ok(output.into_iter().collect())
}

/// Parses `worker_threads = N`, the only supported argument.
fn parse_worker_threads(attr: &str) -> Result<Option<usize>, String> {
    let mut worker_threads = None;

    for part in attr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some(value) = part.strip_prefix("worker_threads") else {
            return Err(format!("unknown argument `{part}`"));
        };

        let value = value.trim_start().trim_start_matches('=').trim();
        match value.parse::<usize>() {
            Ok(n) if n > 0 => worker_threads = Some(n),
            _ => return Err(format!("invalid worker_threads value `{value}`")),
        }
    }

    Ok(worker_threads)
}

fn compile_error(message: String) -> TokenStream {
    format!("compile_error!({message:?});").parse().unwrap()
}
