//! Resource context extraction from materialized rows

use std::collections::BTreeMap;

use cape_common::{Error, Result, Value};

use crate::policy::Policy;
use crate::record::Record;

/// Attribute values of a single row needed for an access decision
pub type ResourceContext = BTreeMap<String, Value>;

/// Build the resource context of `row` for the given policies.
///
/// Context fields are collected first; a field already present is never
/// overwritten. Owner fields are added afterwards when not yet present. A field
/// that does not exist on the row is a configuration error.
pub fn build_resource_context<R>(row: &R, policies: &[Policy]) -> Result<ResourceContext>
where
    R: Record + ?Sized,
{
    let mut context = ResourceContext::new();

    for policy in policies {
        for field in &policy.context_fields {
            if !context.contains_key(field) {
                context.insert(field.clone(), read_field(row, field)?);
            }
        }

        if let Some(owner) = &policy.owner_field {
            if !context.contains_key(owner) {
                context.insert(owner.clone(), read_field(row, owner)?);
            }
        }
    }

    Ok(context)
}

fn read_field<R: Record + ?Sized>(row: &R, field: &str) -> Result<Value> {
    row.field(field)
        .cloned()
        .ok_or_else(|| Error::missing_field(row.resource(), field))
}
