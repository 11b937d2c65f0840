//! Data migration helpers.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::data::SubjectData;
use crate::error::Result;

static ALTERNATION_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((.*?)\)").expect("alternation pattern is valid"));

/// Rewrite a legacy regex-style node into the current syntax.
///
/// `(a|b)` groups become `{a,b}` globs, and a trailing `.*` is dropped since
/// a node already governs everything below it.
///
/// The node tree has no glob support: a converted node that still holds a
/// `{a,b}` group is rejected as `InvalidPermission` when stored, and must be
/// split into one node per alternative by the caller.
pub fn convert_legacy_permission(permission: &str) -> String {
    let mut converted = ALTERNATION_GROUP
        .replace_all(permission, |caps: &Captures<'_>| {
            format!("{{{}}}", caps[1].replace('|', ","))
        })
        .into_owned();
    if converted.len() > 2 && converted.ends_with(".*") {
        converted.truncate(converted.len() - 2);
    }
    converted
}

/// Copy every context's permissions, options, parents and default value
/// from `old` onto `new`. Fields `old` leaves empty keep `new`'s values.
pub fn transfer(old: &SubjectData, new: SubjectData) -> Result<SubjectData> {
    let mut data = new;
    for (ctx, permissions) in old.all_permissions() {
        data = data.set_permissions(ctx, permissions.iter().map(|(k, &v)| (k, v)))?;
    }
    for (ctx, options) in old.all_options() {
        data = data.set_options(ctx, options.iter().map(|(k, v)| (k.clone(), v.clone())))?;
    }
    for (ctx, parents) in old.all_parents() {
        data = data.set_parents(ctx, parents.iter().cloned());
    }
    for (ctx, value) in old.all_default_values() {
        data = data.set_default_value(ctx, value);
    }
    Ok(data)
}
