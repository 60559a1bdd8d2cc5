//! Self-checks of plan node copy and serialization.
//!
//! Plans are cached across executions of prepared statements and shipped
//! to other backends, so every node must survive serialize → deserialize →
//! copy unchanged. The checks run in debug builds and with the
//! `serialization-check` feature; otherwise they cost nothing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PlannerError;

fn checks_enabled() -> bool {
    cfg!(any(debug_assertions, feature = "serialization-check"))
}

/// Round-trip `node` through serialization and a copy, compare the two
/// dumps, and return the copy. Returns a plain clone when checks are off.
pub fn check_node_copy_and_serialization<T>(node: &T) -> Result<T, PlannerError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    if !checks_enabled() {
        return Ok(node.clone());
    }

    let out = serde_json::to_string(node)?;
    let deserialized: T = serde_json::from_str(&out)?;
    let copy = deserialized.clone();
    let out_copy = serde_json::to_string(&copy)?;
    if out != out_copy {
        return Err(PlannerError::InternalError(format!(
            "plan node changed across copy and serialization: {out} != {out_copy}"
        )));
    }
    Ok(copy)
}

/// Check that `node` can be dumped.
pub fn check_node_is_dumpable<T: Serialize>(node: &T) -> Result<(), PlannerError> {
    if checks_enabled() {
        serde_json::to_string(node)?;
    }
    Ok(())
}
