//! Purpose: Expand, validate, and remap service names against a node's namespace.
//! Exports: `expand_name`, `validate_full_name`, `validate_node_name`, `normalize_namespace`, `RemapRule`.
//! Role: Default name resolution used by every `Middleware`.
//! Invariants: Expanded names are absolute, have no empty tokens, and no trailing separator.
//! Invariants: Tokens are `[A-Za-z0-9_]+` and never start with a digit.

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemapRule {
    pub from: String,
    pub to: String,
}

impl RemapRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parses `from:=to`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let (from, to) = input.split_once(":=").ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("remap rule must look like from:=to, got {input:?}"))
        })?;
        if from.is_empty() || to.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("remap rule has an empty side: {input:?}")));
        }
        Ok(Self::new(from, to))
    }
}

pub fn validate_node_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(invalid("node name must not be empty"));
    }
    validate_token(name).map_err(|reason| invalid(format!("node name {name:?} {reason}")))
}

/// Empty maps to `/`; anything else must be absolute without a trailing separator.
pub fn normalize_namespace(namespace: &str) -> Result<String, Error> {
    if namespace.is_empty() || namespace == "/" {
        return Ok("/".to_string());
    }
    validate_full_name(namespace)
        .map_err(|err| invalid(format!("invalid namespace {namespace:?}: {}", reason_of(&err))))?;
    Ok(namespace.to_string())
}

pub fn expand_name(raw: &str, node_name: &str, namespace: &str) -> Result<String, Error> {
    if raw.is_empty() {
        return Err(invalid("service name must not be empty"));
    }
    let substituted = substitute(raw, node_name, namespace)?;
    let prefix = if namespace == "/" { "" } else { namespace };

    let expanded = if let Some(rest) = substituted.strip_prefix('~') {
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(invalid(format!(
                "'~' must be followed by '/' in {raw:?}"
            )));
        }
        format!("{prefix}/{node_name}{rest}")
    } else if substituted.starts_with('/') {
        substituted
    } else {
        format!("{prefix}/{substituted}")
    };

    validate_full_name(&expanded)
        .map_err(|err| invalid(format!("invalid service name {raw:?}: {}", reason_of(&err))))?;
    Ok(expanded)
}

pub fn validate_full_name(name: &str) -> Result<(), Error> {
    let Some(body) = name.strip_prefix('/') else {
        return Err(invalid("name must be absolute"));
    };
    if body.is_empty() {
        return Err(invalid("name must have at least one token"));
    }
    if body.ends_with('/') {
        return Err(invalid("name must not end with '/'"));
    }
    for (index, token) in body.split('/').enumerate() {
        if token.is_empty() {
            return Err(invalid("name must not contain '//'"));
        }
        validate_token(token).map_err(|reason| invalid(format!("token {index} {reason}")))?;
    }
    Ok(())
}

/// First matching rule wins; both sides are expanded before comparison.
pub fn apply_remaps(
    expanded: &str,
    rules: &[RemapRule],
    node_name: &str,
    namespace: &str,
) -> Result<String, Error> {
    for rule in rules {
        let from = expand_name(&rule.from, node_name, namespace)?;
        if from == expanded {
            return expand_name(&rule.to, node_name, namespace);
        }
    }
    Ok(expanded.to_string())
}

fn substitute(raw: &str, node_name: &str, namespace: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(format!("unmatched '{{' in {raw:?}")))?;
        let key = &after[..close];
        let tail = &after[close + 1..];
        match key {
            "node" => out.push_str(node_name),
            "ns" | "namespace" => {
                if !(namespace == "/" && tail.starts_with('/')) {
                    out.push_str(namespace);
                }
            }
            other => {
                return Err(invalid(format!("unknown substitution {{{other}}} in {raw:?}")));
            }
        }
        rest = tail;
    }
    if rest.contains('}') {
        return Err(invalid(format!("unmatched '}}' in {raw:?}")));
    }
    out.push_str(rest);
    Ok(out)
}

fn validate_token(token: &str) -> Result<(), String> {
    if let Some(first) = token.chars().next() {
        if first.is_ascii_digit() {
            return Err("must not start with a digit".to_string());
        }
    }
    if let Some(bad) = token
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
    {
        return Err(format!("contains invalid character {bad:?}"));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidArgument).with_message(message)
}

fn reason_of(err: &Error) -> String {
    err.message().unwrap_or("invalid").to_string()
}
