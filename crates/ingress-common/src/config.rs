//! Environment substitution for YAML configuration files.
//!
//! Supports `${VAR}` and `${VAR:-default}`. An unset `${VAR}` without a
//! default is a configuration error.

use crate::error::{IngressError, IngressResult};

/// Expand `${VAR}` and `${VAR:-default}` references in `content`.
pub fn expand_env_vars(content: &str) -> IngressResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => {
                        return Err(IngressError::Configuration(format!(
                            "Unclosed variable substitution: ${{{}",
                            var_expr
                        )))
                    }
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> IngressResult<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).map_err(|_| {
            IngressError::Configuration(format!("Environment variable {} not set", expr))
        })
    }
}
