use std::collections::HashSet;

use indexmap::IndexMap;

use super::log;
use super::ChildPlan;
use super::PlanNode;
use super::QueryPlan;
use crate::error::PlanningError;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::registry::FieldInfo;
use crate::registry::SchemaRegistry;
use crate::registry::ENTITIES_FIELD;
use crate::registry::KEY_FIELD;
use crate::registry::ROOT_TYPE;
use crate::registry::TYPENAME;
use crate::spec::Selection;
use crate::spec::SelectionSet;

/// Partitions queries by owning service.
///
/// Planning is pure: it only reads the registry.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner<'a> {
    registry: &'a SchemaRegistry,
}

/// Where in the response the selections being planned live.
///
/// `origin` is the absolute path of the current node's root objects, `path` is relative to
/// them. Child plans record `path`; errors report `origin` joined with `path`.
struct Location<'p> {
    origin: &'p Path,
    path: Path,
}

impl Location<'_> {
    fn absolute(&self) -> Path {
        self.origin.join(&self.path)
    }
}

impl<'a> QueryPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        QueryPlanner { registry }
    }

    /// Plan a query on the root type: one node per owning service, in first appearance order.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn plan(&self, selection_set: &SelectionSet) -> Result<QueryPlan, PlanningError> {
        let root = Path::empty();
        let location = Location {
            origin: &root,
            path: Path::empty(),
        };
        let mut groups: IndexMap<&str, SelectionSet> = IndexMap::new();
        let mut seen = HashSet::new();

        for selection in selection_set {
            if !self.applies(selection, ROOT_TYPE, &location)? {
                continue;
            }
            check_alias(&mut seen, selection, &location)?;
            if selection.name == TYPENAME {
                check_leaf(selection, &location)?;
                continue;
            }
            check_reserved(selection, &location)?;
            let owner = self
                .registry
                .lookup(ROOT_TYPE, &selection.name)
                .map_err(|_| unknown_field(ROOT_TYPE, selection, &location))?;
            groups.entry(owner).or_default().push(unscoped(selection));
        }

        let nodes = groups
            .into_iter()
            .map(|(service, selections)| self.plan_node_at(&selections, ROOT_TYPE, service, &root))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = QueryPlan {
            root_type: ROOT_TYPE.to_string(),
            nodes,
            query: selection_set.clone(),
        };
        tracing::debug!(
            nodes = plan.nodes.len(),
            fetches = plan.subgraph_fetches(),
            "query planned"
        );
        log::trace_query_plan(&plan);
        Ok(plan)
    }

    /// Plan `selection_set` on instances of `current_type` fetched from `current_service`.
    pub fn plan_node(
        &self,
        selection_set: &SelectionSet,
        current_type: &str,
        current_service: &str,
    ) -> Result<PlanNode, PlanningError> {
        if !self.registry.is_object(current_type) {
            return Err(PlanningError::UnknownType {
                type_name: current_type.to_string(),
                path: Path::empty(),
            });
        }
        self.plan_node_at(selection_set, current_type, current_service, &Path::empty())
    }

    fn plan_node_at(
        &self,
        selection_set: &SelectionSet,
        type_name: &str,
        service: &str,
        origin: &Path,
    ) -> Result<PlanNode, PlanningError> {
        let mut children = Vec::new();
        let location = Location {
            origin,
            path: Path::empty(),
        };
        let selection_set =
            self.plan_object(selection_set, type_name, service, &location, &mut children)?;
        Ok(PlanNode {
            service: service.to_string(),
            type_name: type_name.to_string(),
            selection_set,
            children,
        })
    }

    /// Returns the part of `selections` served by `service`; everything else becomes child
    /// plans recorded at the current location.
    fn plan_object(
        &self,
        selections: &[Selection],
        type_name: &str,
        service: &str,
        location: &Location<'_>,
        children: &mut Vec<ChildPlan>,
    ) -> Result<SelectionSet, PlanningError> {
        let mut local = Vec::new();
        let mut groups: IndexMap<&str, SelectionSet> = IndexMap::new();
        let mut seen = HashSet::new();

        for selection in selections {
            if !self.applies(selection, type_name, location)? {
                continue;
            }
            check_alias(&mut seen, selection, location)?;
            if selection.name == TYPENAME {
                // produced by the merger from the static type
                check_leaf(selection, location)?;
                continue;
            }
            check_reserved(selection, location)?;
            let info = self
                .registry
                .field(type_name, &selection.name)
                .ok_or_else(|| unknown_field(type_name, selection, location))?;

            if info.services.contains(service) {
                local.push(self.plan_local_field(selection, info, service, location, children)?);
            } else {
                groups
                    .entry(info.owner.as_str())
                    .or_default()
                    .push(unscoped(selection));
            }
        }

        for (owner, group) in groups {
            if !self.registry.key_extractor(type_name, service) {
                return Err(PlanningError::MissingKeyExtractor {
                    type_name: type_name.to_string(),
                    service: service.to_string(),
                    path: location.absolute(),
                });
            }
            if !self.registry.key_resolver(type_name, owner) {
                return Err(PlanningError::MissingKeyResolver {
                    type_name: type_name.to_string(),
                    service: owner.to_string(),
                    path: location.absolute(),
                });
            }
            if !local.iter().any(|selection| selection.name == KEY_FIELD) {
                local.push(Selection::field(KEY_FIELD));
            }
            tracing::trace!(
                "boundary at '{}': {} -> {} for {}",
                location.absolute(),
                service,
                owner,
                type_name
            );
            let node = self.plan_node_at(&group, type_name, owner, &location.absolute())?;
            children.push(ChildPlan {
                path: location.path.clone(),
                node,
            });
        }

        Ok(local)
    }

    fn plan_local_field(
        &self,
        selection: &Selection,
        info: &FieldInfo,
        service: &str,
        location: &Location<'_>,
        children: &mut Vec<ChildPlan>,
    ) -> Result<Selection, PlanningError> {
        let inner = info.ty.inner_type_name();
        let composite = self.registry.is_composite(inner);
        match (&selection.selection_set, composite) {
            (None, false) => Ok(unscoped(selection)),
            (Some(_), false) => Err(PlanningError::InvalidSelection {
                field: selection.name.clone(),
                reason: format!("field of type '{}' cannot have a selection set", info.ty),
                path: location.absolute(),
            }),
            (None, true) => Err(PlanningError::InvalidSelection {
                field: selection.name.clone(),
                reason: format!("field of type '{}' needs a selection set", info.ty),
                path: location.absolute(),
            }),
            (Some(sub_selections), true) => {
                let mut path = location.path.with(PathElement::Key(selection.alias.clone()));
                for _ in 0..info.ty.list_depth() {
                    path.push(PathElement::Flatten);
                }
                let nested = Location {
                    origin: location.origin,
                    path,
                };
                let selection_set = if self.registry.is_object(inner) {
                    self.plan_object(sub_selections, inner, service, &nested, children)?
                } else {
                    self.plan_union(sub_selections, inner, service, &nested, children)?
                };
                Ok(Selection {
                    selection_set: Some(selection_set),
                    fragment_type: None,
                    ..selection.clone()
                })
            }
        }
    }

    /// Plans every member fragment on its own type. The returned selections keep their member
    /// as `fragment_type` so the service knows which payload they belong to.
    fn plan_union(
        &self,
        selections: &[Selection],
        union_name: &str,
        service: &str,
        location: &Location<'_>,
        children: &mut Vec<ChildPlan>,
    ) -> Result<SelectionSet, PlanningError> {
        let mut members: IndexMap<&str, SelectionSet> = IndexMap::new();
        let mut seen = HashSet::new();

        for selection in selections {
            let member = match selection.fragment_type.as_deref() {
                Some(fragment) if fragment != union_name => fragment,
                _ => {
                    if selection.name != TYPENAME {
                        return Err(PlanningError::InvalidSelection {
                            field: selection.name.clone(),
                            reason: format!(
                                "fields of union '{union_name}' must be selected through a fragment on one of its members"
                            ),
                            path: location.absolute(),
                        });
                    }
                    check_alias(&mut seen, selection, location)?;
                    check_leaf(selection, location)?;
                    continue;
                }
            };
            if !self.registry.is_union_member(union_name, member) {
                return Err(PlanningError::InvalidFragment {
                    fragment: member.to_string(),
                    type_name: union_name.to_string(),
                    path: location.absolute(),
                });
            }
            members
                .entry(member)
                .or_default()
                .push(selection.clone());
        }

        let mut local = Vec::new();
        for (member, selections) in members {
            let nested = Location {
                origin: location.origin,
                path: location
                    .path
                    .with(PathElement::Fragment(member.to_string())),
            };
            let selection_set = self.plan_object(&selections, member, service, &nested, children)?;
            local.extend(selection_set.into_iter().map(|selection| selection.on(member)));
        }
        Ok(local)
    }

    /// Whether a selection applies to objects of `type_name`, given its fragment type.
    fn applies(
        &self,
        selection: &Selection,
        type_name: &str,
        location: &Location<'_>,
    ) -> Result<bool, PlanningError> {
        match selection.fragment_type.as_deref() {
            None => Ok(true),
            Some(fragment) if fragment == type_name => Ok(true),
            Some(fragment) if self.registry.is_union(fragment) => {
                Ok(self.registry.is_union_member(fragment, type_name))
            }
            Some(fragment) if self.registry.is_object(fragment) => Ok(false),
            Some(fragment) => Err(PlanningError::InvalidFragment {
                fragment: fragment.to_string(),
                type_name: type_name.to_string(),
                path: location.absolute(),
            }),
        }
    }
}

fn unscoped(selection: &Selection) -> Selection {
    Selection {
        fragment_type: None,
        ..selection.clone()
    }
}

fn unknown_field(type_name: &str, selection: &Selection, location: &Location<'_>) -> PlanningError {
    PlanningError::UnknownField {
        type_name: type_name.to_string(),
        field: selection.name.clone(),
        path: location.absolute(),
    }
}

fn check_alias(
    seen: &mut HashSet<String>,
    selection: &Selection,
    location: &Location<'_>,
) -> Result<(), PlanningError> {
    if seen.insert(selection.alias.clone()) {
        Ok(())
    } else {
        Err(PlanningError::DuplicateAlias {
            alias: selection.alias.clone(),
            path: location.absolute(),
        })
    }
}

fn check_leaf(selection: &Selection, location: &Location<'_>) -> Result<(), PlanningError> {
    match selection.selection_set {
        Some(_) => Err(PlanningError::InvalidSelection {
            field: selection.name.clone(),
            reason: "field of type 'String' cannot have a selection set".to_string(),
            path: location.absolute(),
        }),
        None => Ok(()),
    }
}

fn check_reserved(selection: &Selection, location: &Location<'_>) -> Result<(), PlanningError> {
    let reserved = [KEY_FIELD, ENTITIES_FIELD];
    let field = if reserved.contains(&selection.name.as_str()) {
        &selection.name
    } else if reserved.contains(&selection.alias.as_str()) || selection.alias == TYPENAME {
        &selection.alias
    } else {
        return Ok(());
    };
    Err(PlanningError::ReservedField {
        field: field.clone(),
        path: location.absolute(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::ObjectCapability;
    use crate::registry::ServiceCapabilities;
    use crate::spec::FieldType;
    use crate::spec::Query;

    fn named(name: &str) -> FieldType {
        FieldType::named(name)
    }

    fn list(name: &str) -> FieldType {
        FieldType::list(FieldType::named(name))
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new([
            ServiceCapabilities::new("schema1")
                .object(
                    "Query",
                    ObjectCapability::new()
                        .field("s1f", named("Foo"))
                        .field("s1fff", list("Foo"))
                        .field("s1both", list("FooOrBar")),
                )
                .object(
                    "Foo",
                    ObjectCapability::new()
                        .key_extractor()
                        .field("name", named("String"))
                        .field("s1hmm", named("String"))
                        .field("s1nest", named("Foo")),
                )
                .object(
                    "Bar",
                    ObjectCapability::new()
                        .key_resolver()
                        .shareable_field("id", named("Int"))
                        .field("s1baz", named("String")),
                )
                .union("FooOrBar", ["Foo", "Bar"]),
            ServiceCapabilities::new("schema2")
                .object(
                    "Query",
                    ObjectCapability::new().field("s2root", named("String")),
                )
                .object(
                    "Foo",
                    ObjectCapability::new()
                        .key_extractor()
                        .key_resolver()
                        .shareable_field("name", named("String"))
                        .field("s2ok", named("Int"))
                        .field("s2bar", named("Bar"))
                        .field("s2nest", named("Foo")),
                )
                .object(
                    "Bar",
                    ObjectCapability::new()
                        .key_extractor()
                        .field("id", named("Int")),
                ),
        ])
        .unwrap()
    }

    fn query(text: &str) -> SelectionSet {
        Query::parse(text, None, &Default::default())
            .unwrap()
            .selection_set
    }

    fn plan(text: &str) -> Result<QueryPlan, PlanningError> {
        let registry = registry();
        QueryPlanner::new(&registry).plan(&query(text))
    }

    #[test]
    fn single_service_query_is_one_node() {
        let plan = plan("{ s1f { name s1nest { s1hmm } } }").unwrap();
        assert_eq!(plan.nodes.len(), 1);
        assert_eq!(plan.nodes[0].service, "schema1");
        assert!(plan.nodes[0].children.is_empty());
        assert_eq!(plan.nodes[0].selection_set, query("{ s1f { name s1nest { s1hmm } } }"));
        assert_eq!(plan.subgraph_fetches(), 1);
    }

    #[test]
    fn root_fields_are_grouped_by_owner() {
        let plan = plan("{ s2root s1f { name } }").unwrap();
        assert_eq!(
            plan.nodes
                .iter()
                .map(|node| node.service.as_str())
                .collect::<Vec<_>>(),
            vec!["schema2", "schema1"]
        );
    }

    #[test]
    fn boundary_injects_key_and_records_child() {
        let plan = plan("{ s1fff { s1hmm s2ok s2bar { id s1baz } } }").unwrap();
        let root = &plan.nodes[0];
        assert_eq!(
            root.selection_set,
            vec![Selection::field("s1fff").with_selection_set(vec![
                Selection::field("s1hmm"),
                Selection::field(KEY_FIELD),
            ])]
        );
        assert_eq!(root.children.len(), 1);
        let child = &root.children[0];
        assert_eq!(child.path, Path::from("s1fff/@"));
        assert_eq!(child.node.service, "schema2");
        assert_eq!(child.node.type_name, "Foo");
        assert_eq!(
            child.node.selection_set,
            vec![
                Selection::field("s2ok"),
                Selection::field("s2bar").with_selection_set(vec![
                    Selection::field("id"),
                    Selection::field(KEY_FIELD),
                ]),
            ]
        );

        let grandchild = &child.node.children[0];
        assert_eq!(grandchild.path, Path::from("s2bar"));
        assert_eq!(grandchild.node.service, "schema1");
        assert_eq!(grandchild.node.type_name, "Bar");
        assert_eq!(grandchild.node.selection_set, vec![Selection::field("s1baz")]);
        assert_eq!(plan.subgraph_fetches(), 3);
        assert_eq!(plan.services(), vec!["schema1", "schema2"]);
    }

    #[test]
    fn current_service_is_preferred_for_shared_fields() {
        let plan = plan("{ s1f { s2nest { name } } }").unwrap();
        let child = &plan.nodes[0].children[0];
        assert_eq!(
            child.node.selection_set,
            vec![Selection::field("s2nest").with_selection_set(vec![Selection::field("name")])]
        );
        assert!(child.node.children.is_empty());
    }

    #[test]
    fn nested_boundary_path() {
        let plan = plan("{ s1fff { a: s1nest { b: s1nest { s2ok } } } }").unwrap();
        let child = &plan.nodes[0].children[0];
        assert_eq!(child.path, Path::from("s1fff/@/a/b"));
        assert_eq!(child.node.selection_set, vec![Selection::field("s2ok")]);
    }

    #[test]
    fn union_members_are_planned_separately() {
        let plan = plan(
            "{ s1both { __typename ... on Foo { name s2ok } ... on Bar { id s1baz } } }",
        )
        .unwrap();
        let root = &plan.nodes[0];
        assert_eq!(
            root.selection_set,
            vec![Selection::field("s1both").with_selection_set(vec![
                Selection::field("name").on("Foo"),
                Selection::field(KEY_FIELD).on("Foo"),
                Selection::field("id").on("Bar"),
                Selection::field("s1baz").on("Bar"),
            ])]
        );
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].path, Path::from("s1both/@/|[Foo]"));
        assert_eq!(
            root.children[0].node.selection_set,
            vec![Selection::field("s2ok")]
        );
    }

    #[test]
    fn fragments_on_other_types_are_dropped() {
        let plan = plan("{ s1f { name ... on Bar { id } } }").unwrap();
        assert_eq!(
            plan.nodes[0].selection_set,
            vec![Selection::field("s1f").with_selection_set(vec![Selection::field("name")])]
        );
    }

    #[test]
    fn plan_node_entry_point() {
        let registry = registry();
        let planner = QueryPlanner::new(&registry);
        let node = planner
            .plan_node(&query("{ s2ok name }"), "Foo", "schema2")
            .unwrap();
        assert_eq!(
            node.selection_set,
            vec![Selection::field("s2ok"), Selection::field("name")]
        );
        assert_eq!(
            planner
                .plan_node(&query("{ s2ok }"), "Nope", "schema2")
                .unwrap_err(),
            PlanningError::UnknownType {
                type_name: "Nope".to_string(),
                path: Path::empty(),
            }
        );
    }

    #[test]
    fn planning_errors() {
        assert_eq!(
            plan("{ s1f { nope } }").unwrap_err(),
            PlanningError::UnknownField {
                type_name: "Foo".to_string(),
                field: "nope".to_string(),
                path: Path::from("s1f"),
            }
        );
        assert_eq!(
            plan("{ s1f { __federation } }").unwrap_err(),
            PlanningError::ReservedField {
                field: KEY_FIELD.to_string(),
                path: Path::from("s1f"),
            }
        );
        assert_eq!(
            plan("{ _federation { name } }").unwrap_err(),
            PlanningError::ReservedField {
                field: ENTITIES_FIELD.to_string(),
                path: Path::empty(),
            }
        );
        assert!(matches!(
            plan("{ s1f { name { x } } }").unwrap_err(),
            PlanningError::InvalidSelection { .. }
        ));
        assert!(matches!(
            plan("{ s1f }").unwrap_err(),
            PlanningError::InvalidSelection { .. }
        ));
        assert!(matches!(
            plan("{ s1both { name } }").unwrap_err(),
            PlanningError::InvalidSelection { .. }
        ));
        assert_eq!(
            plan("{ s1both { ... on Query { s2root } } }").unwrap_err(),
            PlanningError::InvalidFragment {
                fragment: "Query".to_string(),
                type_name: "FooOrBar".to_string(),
                path: Path::from("s1both/@"),
            }
        );
        assert_eq!(
            plan("{ s1f { name name } }").unwrap_err(),
            PlanningError::DuplicateAlias {
                alias: "name".to_string(),
                path: Path::from("s1f"),
            }
        );
    }

    #[test]
    fn missing_key_capabilities() {
        let registry = SchemaRegistry::new([
            ServiceCapabilities::new("a")
                .object("Query", ObjectCapability::new().field("x", named("Item")))
                .object("Item", ObjectCapability::new().field("id", named("Int"))),
            ServiceCapabilities::new("b").object(
                "Item",
                ObjectCapability::new()
                    .key_resolver()
                    .field("extra", named("String")),
            ),
        ])
        .unwrap();
        assert_eq!(
            QueryPlanner::new(&registry)
                .plan(&query("{ x { extra } }"))
                .unwrap_err(),
            PlanningError::MissingKeyExtractor {
                type_name: "Item".to_string(),
                service: "a".to_string(),
                path: Path::from("x"),
            }
        );

        let registry = SchemaRegistry::new([
            ServiceCapabilities::new("a")
                .object("Query", ObjectCapability::new().field("x", named("Item")))
                .object(
                    "Item",
                    ObjectCapability::new()
                        .key_extractor()
                        .field("id", named("Int")),
                ),
            ServiceCapabilities::new("b").object(
                "Item",
                ObjectCapability::new().field("extra", named("String")),
            ),
        ])
        .unwrap();
        assert_eq!(
            QueryPlanner::new(&registry)
                .plan(&query("{ x { extra } }"))
                .unwrap_err(),
            PlanningError::MissingKeyResolver {
                type_name: "Item".to_string(),
                service: "b".to_string(),
                path: Path::from("x"),
            }
        );
    }
}
