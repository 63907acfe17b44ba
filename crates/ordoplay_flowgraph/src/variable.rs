// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named, typed variables shared by a graph.
//!
//! Nodes refer to variables by name only. The table itself knows nothing about
//! nodes; [`Graph`](crate::Graph) wraps these operations and revalidates every
//! variable node after each structural change.

use crate::port::{PortType, PortValue};
use serde::{Deserialize, Serialize};

/// Error from a variable table operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VariableError {
    /// No variable with this name
    #[error("Unknown variable `{0}`")]
    UnknownVariable(String),

    /// Type is outside the supported variable type set
    #[error("Variables cannot hold {0} values")]
    UnsupportedType(PortType),

    /// Assigned value does not fit the declared type
    #[error("Variable `{name}` is {expected}, got {found}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Declared type
        expected: PortType,
        /// Type of the rejected value
        found: PortType,
    },
}

/// Metadata and value of a variable exposed on a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVariable {
    /// Unique name within the table
    pub name: String,
    /// Declared type
    var_type: PortType,
    /// Constants cannot be written by set nodes
    pub constant: bool,
    /// Current value, always of `var_type`
    value: PortValue,
}

impl GraphVariable {
    fn new(name: String, var_type: PortType) -> Self {
        let value = PortValue::default_for(&var_type);
        Self {
            name,
            var_type,
            constant: false,
            value,
        }
    }

    /// Declared type
    pub fn var_type(&self) -> &PortType {
        &self.var_type
    }

    /// Current value
    pub fn value(&self) -> &PortValue {
        &self.value
    }

    /// Replace the value, widening it to the declared type
    pub fn set_value(&mut self, value: PortValue) -> Result<(), VariableError> {
        let found = value.port_type();
        self.value = value
            .cast_to(&self.var_type)
            .ok_or_else(|| VariableError::TypeMismatch {
                name: self.name.clone(),
                expected: self.var_type.clone(),
                found,
            })?;
        Ok(())
    }
}

/// Ordered list of graph variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableTable {
    entries: Vec<GraphVariable>,
}

impl VariableTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a variable by name
    pub fn find(&self, name: &str) -> Option<&GraphVariable> {
        self.entries.iter().find(|v| v.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut GraphVariable, VariableError> {
        self.entries
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| VariableError::UnknownVariable(name.to_string()))
    }

    /// Add a variable named after its type, e.g. "New Float"
    pub fn add(&mut self, var_type: PortType) -> Result<&GraphVariable, VariableError> {
        let name = format!("New {}", var_type.name());
        self.add_named(&name, var_type)
    }

    /// Add a variable, deduplicating the requested name
    pub fn add_named(&mut self, name: &str, var_type: PortType) -> Result<&GraphVariable, VariableError> {
        if !var_type.is_variable_type() {
            return Err(VariableError::UnsupportedType(var_type));
        }
        let name = self.deduplicate_name(name, None);
        self.entries.push(GraphVariable::new(name, var_type));
        let index = self.entries.len() - 1;
        Ok(&self.entries[index])
    }

    /// Remove a variable by name
    pub fn remove(&mut self, name: &str) -> Result<GraphVariable, VariableError> {
        let index = self
            .entries
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| VariableError::UnknownVariable(name.to_string()))?;
        Ok(self.entries.remove(index))
    }

    /// Rename a variable, returning the deduplicated name it ended up with
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<String, VariableError> {
        if old_name == new_name {
            return self
                .find(old_name)
                .map(|v| v.name.clone())
                .ok_or_else(|| VariableError::UnknownVariable(old_name.to_string()));
        }
        let deduplicated = self.deduplicate_name(new_name, Some(old_name));
        let variable = self.find_mut(old_name)?;
        variable.name = deduplicated.clone();
        Ok(deduplicated)
    }

    /// Change the declared type. The value resets to the new type's zero value.
    pub fn set_type(&mut self, name: &str, var_type: PortType) -> Result<(), VariableError> {
        if !var_type.is_variable_type() {
            return Err(VariableError::UnsupportedType(var_type));
        }
        let variable = self.find_mut(name)?;
        if variable.var_type != var_type {
            variable.value = PortValue::default_for(&var_type);
            variable.var_type = var_type;
        }
        Ok(())
    }

    /// Write a value
    pub fn set_value(&mut self, name: &str, value: PortValue) -> Result<(), VariableError> {
        self.find_mut(name)?.set_value(value)
    }

    /// Mark a variable constant or writable
    pub fn set_constant(&mut self, name: &str, constant: bool) -> Result<(), VariableError> {
        self.find_mut(name)?.constant = constant;
        Ok(())
    }

    /// All variables in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &GraphVariable> {
        self.entries.iter()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a name like `name` that no other variable uses.
    ///
    /// Collisions are "Base" or "Base N". The result is "Base M+1" where M is the
    /// largest suffix found among the collisions (at least 1).
    pub fn deduplicate_name(&self, name: &str, excluding: Option<&str>) -> String {
        let mut largest = 1u64;
        let mut found = false;

        for existing in self.entries.iter().map(|v| v.name.as_str()) {
            if Some(existing) == excluding {
                continue;
            }
            let Some(rest) = existing.strip_prefix(name) else {
                continue;
            };
            if rest.is_empty() {
                found = true;
                continue;
            }
            let digits = rest.trim_start();
            if digits.len() == rest.len() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            found = true;
            if let Ok(n) = digits.parse::<u64>() {
                largest = largest.max(n);
            }
        }

        if !found {
            return name.to_string();
        }
        if let Some(next) = largest.checked_add(1) {
            return format!("{name} {next}");
        }

        // Suffixes are exhausted; take the smallest free one
        let taken = |candidate: &str| {
            self.entries
                .iter()
                .any(|v| v.name == candidate && Some(v.name.as_str()) != excluding)
        };
        let mut n = 2u64;
        loop {
            let candidate = format!("{name} {n}");
            if !taken(&candidate) {
                return candidate;
            }
            n = n.saturating_add(1);
        }
    }
}

impl<'a> IntoIterator for &'a VariableTable {
    type Item = &'a GraphVariable;
    type IntoIter = std::slice::Iter<'a, GraphVariable>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(table: &VariableTable) -> Vec<&str> {
        table.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_deduplicate_repeated_adds() {
        let mut table = VariableTable::new();
        table.add_named("Foo", PortType::Float).unwrap();
        table.add_named("Foo", PortType::Float).unwrap();
        table.add_named("Foo", PortType::Int).unwrap();
        assert_eq!(names(&table), vec!["Foo", "Foo 2", "Foo 3"]);
    }

    #[test]
    fn test_deduplicate_uses_largest_suffix() {
        let mut table = VariableTable::new();
        table.add_named("Speed", PortType::Float).unwrap();
        table.add_named("Speed 7", PortType::Float).unwrap();
        assert_eq!(table.deduplicate_name("Speed", None), "Speed 8");
        // Similar prefixes without a numeric suffix do not collide
        table.add_named("Speedy", PortType::Float).unwrap();
        assert_eq!(table.deduplicate_name("Speedy", None), "Speedy 2");
        assert_eq!(table.deduplicate_name("Health", None), "Health");
    }

    #[test]
    fn test_deduplicate_at_largest_suffix() {
        let mut table = VariableTable::new();
        table.add_named("Foo 18446744073709551615", PortType::Float).unwrap();
        let added = table.add_named("Foo", PortType::Float).unwrap().name.clone();
        assert_eq!(added, "Foo 2");
        let again = table.add_named("Foo", PortType::Float).unwrap().name.clone();
        assert_eq!(again, "Foo 3");
        assert_eq!(table.rename("Foo 3", "Foo").unwrap(), "Foo 3");
    }

    #[test]
    fn test_auto_names_follow_type() {
        let mut table = VariableTable::new();
        assert_eq!(table.add(PortType::Float).unwrap().name, "New Float");
        assert_eq!(table.add(PortType::Float).unwrap().name, "New Float 2");
        assert_eq!(table.add(PortType::Color).unwrap().name, "New Color");
    }

    #[test]
    fn test_rename_excludes_self() {
        let mut table = VariableTable::new();
        table.add_named("Foo", PortType::Float).unwrap();
        table.add_named("Foo 2", PortType::Float).unwrap();

        // Renaming "Foo 2" to "Foo" only collides with the other entry
        assert_eq!(table.rename("Foo 2", "Foo").unwrap(), "Foo 2");
        assert_eq!(table.rename("Foo", "Bar").unwrap(), "Bar");
        assert_eq!(names(&table), vec!["Bar", "Foo 2"]);
        assert_eq!(
            table.rename("Missing", "Other"),
            Err(VariableError::UnknownVariable("Missing".to_string()))
        );
    }

    #[test]
    fn test_unsupported_types_rejected() {
        let mut table = VariableTable::new();
        assert_eq!(
            table.add(PortType::Exec).unwrap_err(),
            VariableError::UnsupportedType(PortType::Exec)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_values_follow_declared_type() {
        let mut table = VariableTable::new();
        table.add_named("x", PortType::Float).unwrap();
        assert_eq!(table.find("x").unwrap().value(), &PortValue::Float(0.0));

        table.set_value("x", PortValue::Int(4)).unwrap();
        assert_eq!(table.find("x").unwrap().value(), &PortValue::Float(4.0));
        assert!(table.set_value("x", PortValue::from("four")).is_err());

        table.set_type("x", PortType::String).unwrap();
        assert_eq!(table.find("x").unwrap().value(), &PortValue::String(String::new()));
    }

    #[test]
    fn test_remove() {
        let mut table = VariableTable::new();
        table.add_named("a", PortType::Bool).unwrap();
        assert_eq!(table.remove("a").unwrap().name, "a");
        assert!(table.remove("a").is_err());
    }
}
