// src/fk_map.rs

use crate::models::{EntityKind, IdKind};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// One inbound foreign-key edge: rows of `table` whose `column` holds a
/// member id of some entity kind. `pk_column` identifies rewritten rows
/// in the merge log; most tables use "id", a couple predate that
/// convention.
#[derive(Debug, Clone, Copy)]
pub struct FkRef {
    pub table: &'static str,
    pub column: &'static str,
    pub id_kind: IdKind,
    pub pk_column: &'static str,
}

impl FkRef {
    const fn new(table: &'static str, column: &'static str, id_kind: IdKind) -> Self {
        Self {
            table,
            column,
            id_kind,
            pk_column: "id",
        }
    }

    const fn with_pk(
        table: &'static str,
        column: &'static str,
        id_kind: IdKind,
        pk_column: &'static str,
    ) -> Self {
        Self {
            table,
            column,
            id_kind,
            pk_column,
        }
    }
}

/// Declarative registry of every inbound FK the merge engine rewrites.
/// Adding a new referencing table is one entry here; the merge and
/// revert executors are entirely table-driven.
static FK_MAP: Lazy<HashMap<EntityKind, Vec<FkRef>>> = Lazy::new(|| {
    let mut map = HashMap::new();

    map.insert(
        EntityKind::City,
        vec![
            FkRef::new("neighborhood", "city_id", IdKind::Int),
            FkRef::new("property", "city_id", IdKind::Int),
            FkRef::with_pk("client_address", "city_id", IdKind::Int, "address_id"),
            FkRef::new("listing", "city_id", IdKind::Int),
        ],
    );

    map.insert(
        EntityKind::Neighborhood,
        vec![
            FkRef::new("street", "neighborhood_id", IdKind::Uuid),
            FkRef::new("property", "neighborhood_id", IdKind::Uuid),
            FkRef::with_pk(
                "client_address",
                "neighborhood_id",
                IdKind::Uuid,
                "address_id",
            ),
        ],
    );

    map.insert(
        EntityKind::Street,
        vec![
            FkRef::new("condo", "street_id", IdKind::Uuid),
            FkRef::new("property", "street_id", IdKind::Uuid),
            FkRef::with_pk("client_address", "street_id", IdKind::Uuid, "address_id"),
        ],
    );

    map.insert(
        EntityKind::Condo,
        vec![
            FkRef::new("property", "condo_id", IdKind::Uuid),
            FkRef::new("listing", "condo_id", IdKind::Uuid),
        ],
    );

    map
});

/// Inbound FK edges for a kind, in rewrite order.
pub fn inbound_refs(kind: EntityKind) -> &'static [FkRef] {
    FK_MAP
        .get(&kind)
        .map(|refs| refs.as_slice())
        .unwrap_or(&[])
}

/// Looks an edge up by (table, column), across kinds. Reversal resolves
/// logged rewrites through this, so entries must outlive the merges they
/// recorded.
pub fn find_ref(table: &str, column: &str) -> Option<FkRef> {
    FK_MAP
        .values()
        .flatten()
        .find(|fk| fk.table == table && fk.column == column)
        .copied()
}

/// SQL expression casting a text parameter to the FK column's type.
/// Member ids travel as opaque strings; the double cast keeps the
/// parameter typed as text at the wire level.
pub fn cast_param(id_kind: IdKind, position: usize) -> String {
    match id_kind {
        IdKind::Uuid => format!("${}::text::uuid", position),
        IdKind::Int => format!("${}::text::bigint", position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_inbound_refs() {
        for kind in EntityKind::ALL {
            assert!(
                !inbound_refs(kind).is_empty(),
                "no inbound FK edges for {:?}",
                kind
            );
        }
    }

    #[test]
    fn hierarchy_children_are_inbound_refs_of_their_parent() {
        let city_tables: Vec<_> = inbound_refs(EntityKind::City)
            .iter()
            .map(|r| (r.table, r.column))
            .collect();
        assert!(city_tables.contains(&("neighborhood", "city_id")));

        let neighborhood_tables: Vec<_> = inbound_refs(EntityKind::Neighborhood)
            .iter()
            .map(|r| (r.table, r.column))
            .collect();
        assert!(neighborhood_tables.contains(&("street", "neighborhood_id")));

        let street_tables: Vec<_> = inbound_refs(EntityKind::Street)
            .iter()
            .map(|r| (r.table, r.column))
            .collect();
        assert!(street_tables.contains(&("condo", "street_id")));
    }

    #[test]
    fn id_kinds_follow_the_host_schema() {
        for fk in inbound_refs(EntityKind::City) {
            assert_eq!(fk.id_kind, IdKind::Int, "{}.{}", fk.table, fk.column);
        }
        for kind in [EntityKind::Neighborhood, EntityKind::Street, EntityKind::Condo] {
            for fk in inbound_refs(kind) {
                assert_eq!(fk.id_kind, IdKind::Uuid, "{}.{}", fk.table, fk.column);
            }
        }
    }

    #[test]
    fn pk_column_defaults_to_id_with_overrides() {
        let mut saw_override = false;
        for kind in EntityKind::ALL {
            for fk in inbound_refs(kind) {
                if fk.table == "client_address" {
                    assert_eq!(fk.pk_column, "address_id");
                    saw_override = true;
                } else {
                    assert_eq!(fk.pk_column, "id");
                }
            }
        }
        assert!(saw_override);
    }

    #[test]
    fn cast_param_matches_id_kind() {
        assert_eq!(cast_param(IdKind::Uuid, 1), "$1::text::uuid");
        assert_eq!(cast_param(IdKind::Int, 3), "$3::text::bigint");
    }
}
