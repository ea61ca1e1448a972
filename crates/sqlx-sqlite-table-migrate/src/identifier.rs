use crate::{Error, Result};

/// Validate that a table or column name is safe to interpolate into SQL
///
/// Only alphanumeric characters and underscores are allowed, and the name
/// cannot start with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
   let mut chars = name.chars();
   match chars.next() {
      Some(first) if first.is_ascii_alphabetic() || first == '_' => {
         chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
      }
      _ => false,
   }
}

pub(crate) fn checked(name: &str) -> Result<&str> {
   if is_valid_identifier(name) {
      Ok(name)
   } else {
      Err(Error::InvalidIdentifier(name.to_string()))
   }
}

/// Quote an already validated identifier
pub(crate) fn quoted(name: &str) -> String {
   format!("`{name}`")
}
