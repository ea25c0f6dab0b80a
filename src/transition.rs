use crate::model::{EntitySnapshot, Transition};

/// Detect a change of `field` between two snapshots of the same record.
///
/// Only the named field is compared, so writes that touch other fields never
/// produce a transition. A field missing from `original` compares as empty.
pub fn detect(
    original: &EntitySnapshot,
    current: &EntitySnapshot,
    field: &str,
) -> Option<Transition> {
    let to = current.get(field)?;
    let from = original.get(field).unwrap_or_default();
    if from == to {
        return None;
    }
    Some(Transition {
        entity_id: current.id.clone(),
        from: from.to_string(),
        to: to.to_string(),
    })
}
