// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Conversion between wire method names (`SayHello`) and handler names
//! (`say_hello`).

use std::collections::HashMap;

use crate::errors::RegistrationError;

const SEPARATOR: char = '_';

/// Outcome of the default wire-to-handler conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerName {
    /// The conversion round-trips back to the wire name
    Resolved(String),
    /// The conversion does not round-trip; an explicit name is required
    Ambiguous { candidate: String },
}

impl HandlerName {
    pub fn resolved(&self) -> Option<&str> {
        match self {
            HandlerName::Resolved(name) => Some(name),
            HandlerName::Ambiguous { .. } => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, HandlerName::Ambiguous { .. })
    }
}

/// Convert a wire method name to a handler name.
///
/// A word boundary is inserted before a capital that follows a lowercase
/// letter or a digit, and before the last capital of a run of capitals when
/// a lowercase letter follows. Words are lower-cased and joined with `_`.
pub fn to_handler_name(wire_name: &str) -> HandlerName {
    let chars: Vec<char> = wire_name.chars().collect();
    let mut candidate = String::with_capacity(wire_name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let after_word = prev.is_lowercase() || prev.is_ascii_digit();
            let ends_acronym = prev.is_uppercase() && next.is_some_and(char::is_lowercase);
            if after_word || ends_acronym {
                candidate.push(SEPARATOR);
            }
        }
        candidate.extend(c.to_lowercase());
    }

    if !candidate.is_empty() && to_wire_name(&candidate) == wire_name {
        HandlerName::Resolved(candidate)
    } else {
        HandlerName::Ambiguous { candidate }
    }
}

/// Convert a handler name back to the wire name by capitalizing each word.
pub fn to_wire_name(handler_name: &str) -> String {
    handler_name
        .split(SEPARATOR)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Naming bridge with an explicit override table consulted before the
/// default conversion.
#[derive(Debug, Clone, Default)]
pub struct NamingBridge {
    overrides: HashMap<String, String>,
}

impl NamingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `wire_name` to `handler_name` regardless of the default conversion
    pub fn with_override(
        mut self,
        wire_name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        self.add_override(wire_name, handler_name);
        self
    }

    pub fn add_override(&mut self, wire_name: impl Into<String>, handler_name: impl Into<String>) {
        self.overrides.insert(wire_name.into(), handler_name.into());
    }

    /// Resolve the handler name of a wire method name
    pub fn resolve(&self, wire_name: &str) -> Result<String, RegistrationError> {
        if let Some(handler_name) = self.overrides.get(wire_name) {
            return Ok(handler_name.clone());
        }

        match to_handler_name(wire_name) {
            HandlerName::Resolved(name) => Ok(name),
            HandlerName::Ambiguous { candidate } => Err(RegistrationError::AmbiguousName {
                wire_name: wire_name.to_string(),
                candidate,
            }),
        }
    }
}
