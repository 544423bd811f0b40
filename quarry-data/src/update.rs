//! Optimistic update planning.

use crate::condition::{Assignment, CmpOp, Condition, Term, WriteSet};
use crate::entity::Entity;
use crate::error::{Result, StorageError};
use crate::metadata::PropUpdate;
use crate::value::{Props, Value};

/// Write set and guard of one UPDATE statement, keyed by property name.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub values: WriteSet,
    /// Primary-key equality, plus the original values the policy checks.
    pub guard: Condition,
}

impl UpdatePlan {
    /// Plan the update of `entity` under its type's policy.
    ///
    /// The write set is every current property or only the pending changes,
    /// never the key. The guard pins the key and, depending on the policy,
    /// the original values of all or of the changed properties. Properties
    /// with their own policy are rewritten into deltas and dropped from the
    /// equality guard; a decrement of a `gt_zero`/`gte_zero` property is
    /// guarded so the stored value cannot cross zero.
    pub fn build(entity: &Entity) -> Result<Self> {
        let meta = entity.meta();
        let policy = meta.update_policy();
        let persisted = meta.field_aliases();
        let original = entity.original();

        let mut write: Props = if policy.writes_all() {
            entity.to_props()
        } else {
            entity.changes().clone()
        };
        write.retain(|name, _| persisted.contains_key(name) && !meta.id_names().contains(name));

        let mut checked = Props::new();
        if policy.checks_changed() {
            for name in entity.changes().keys() {
                checked.insert(name.clone(), original.get(name).cloned().unwrap_or_default());
            }
        } else if policy.checks_all() {
            checked = original.clone();
        }
        checked.retain(|name, _| persisted.contains_key(name) && !meta.id_names().contains(name));

        let mut values = WriteSet::new();
        let mut extra = Vec::new();
        for (name, new) in write {
            let policy = meta
                .spec_update_props()
                .get(&name)
                .copied()
                .unwrap_or_default();
            let old = original.get(&name).cloned().unwrap_or_default();
            let assignment = match policy {
                PropUpdate::Overwrite => Assignment::Set(new),
                PropUpdate::Ignore => continue,
                PropUpdate::Incr => Assignment::Add(delta(entity, &name, &new, &old)?),
                PropUpdate::GtZero | PropUpdate::GteZero => {
                    if new.compare(&old).map_or(true, |o| o.is_ge()) {
                        Assignment::Add(delta(entity, &name, &new, &old)?)
                    } else {
                        let offset = delta(entity, &name, &old, &new)?;
                        let op = if policy == PropUpdate::GteZero {
                            CmpOp::Ge
                        } else {
                            CmpOp::Gt
                        };
                        extra.push(Term::Cmp(name.clone(), op, offset.clone()));
                        Assignment::Sub(offset)
                    }
                }
            };
            values.insert(name, assignment);
        }

        for name in meta.spec_update_props().keys() {
            checked.remove(name);
        }

        let mut guard = Condition::all();
        for (name, value) in checked {
            guard.push(Term::Eq(name, value));
        }
        for term in extra {
            guard.push(term);
        }
        for name in meta.id_names() {
            guard.push(Term::Eq(name.clone(), entity.raw(name)?));
        }

        Ok(UpdatePlan { values, guard })
    }
}

fn delta(entity: &Entity, name: &str, a: &Value, b: &Value) -> Result<Value> {
    a.numeric_sub(b).ok_or_else(|| {
        StorageError::InvalidArgument(format!(
            "'{}.{name}' uses an arithmetic update policy but holds a non-numeric value",
            entity.type_name()
        ))
    })
}
