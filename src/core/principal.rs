// Kerberos principal names: parsing and canonical (escaped) rendering.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

const COMPONENT_SEPARATOR: char = '/';
const REALM_SEPARATOR: char = '@';
const ESCAPE: char = '\\';

/// A Kerberos identity: one or more name components plus an optional realm.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Principal {
    components: Vec<String>,
    realm: Option<String>,
}

impl Principal {
    /// Parses `user[/instance...][@REALM]`, honoring backslash escapes.
    /// `default_realm` is applied when the text names no realm.
    pub fn parse(text: &str, default_realm: Option<&str>) -> Result<Self, Error> {
        if text.is_empty() {
            return Err(parse_error(text, "empty principal name"));
        }

        let mut components = Vec::new();
        let mut current = String::new();
        let mut realm: Option<String> = None;
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => {
                    let Some(next) = chars.next() else {
                        return Err(parse_error(text, "trailing escape character"));
                    };
                    current.push(unescape(next));
                }
                COMPONENT_SEPARATOR if realm.is_none() => {
                    components.push(std::mem::take(&mut current));
                }
                REALM_SEPARATOR => {
                    if realm.is_some() {
                        return Err(parse_error(text, "more than one realm separator"));
                    }
                    components.push(std::mem::take(&mut current));
                    realm = Some(String::new());
                }
                _ => current.push(ch),
            }
        }

        let realm = match realm {
            Some(_) => {
                if current.is_empty() {
                    return Err(parse_error(text, "empty realm"));
                }
                Some(current)
            }
            None => {
                components.push(current);
                default_realm.map(str::to_string)
            }
        };
        if components.iter().all(String::is_empty) {
            return Err(parse_error(text, "empty principal name"));
        }
        Ok(Self { components, realm })
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Second component, e.g. `admin` in `user/admin`.
    pub fn instance(&self) -> Option<&str> {
        self.components.get(1).map(String::as_str)
    }

    /// Same principal with `instance` appended as the second component.
    pub fn with_instance(&self, instance: &str) -> Self {
        let mut components = vec![self.components[0].clone()];
        components.push(instance.to_string());
        Self {
            components,
            realm: self.realm.clone(),
        }
    }

    /// Escaped display form with the realm suffix removed.
    pub fn name_without_realm(&self) -> String {
        let rendered = self.to_string();
        strip_realm(&rendered).to_string()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "{COMPONENT_SEPARATOR}")?;
            }
            write_escaped(f, component, true)?;
        }
        if let Some(realm) = &self.realm {
            write!(f, "{REALM_SEPARATOR}")?;
            write_escaped(f, realm, false)?;
        }
        Ok(())
    }
}

/// Cuts a rendered principal at the first unescaped `@`.
pub fn strip_realm(rendered: &str) -> &str {
    let mut escaped = false;
    for (idx, ch) in rendered.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == ESCAPE {
            escaped = true;
        } else if ch == REALM_SEPARATOR {
            return &rendered[..idx];
        }
    }
    rendered
}

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str, in_component: bool) -> fmt::Result {
    for ch in text.chars() {
        match ch {
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\u{8}' => f.write_str("\\b")?,
            '\0' => f.write_str("\\0")?,
            ESCAPE | REALM_SEPARATOR => write!(f, "{ESCAPE}{ch}")?,
            COMPONENT_SEPARATOR if in_component => write!(f, "{ESCAPE}{ch}")?,
            _ => write!(f, "{ch}")?,
        }
    }
    Ok(())
}

fn unescape(ch: char) -> char {
    match ch {
        'n' => '\n',
        't' => '\t',
        'b' => '\u{8}',
        '0' => '\0',
        other => other,
    }
}

fn parse_error(text: &str, reason: &str) -> Error {
    Error::new(ErrorKind::Parse).with_message(format!("cannot parse principal {text:?}: {reason}"))
}
