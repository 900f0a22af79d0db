//! Model relations: kinds, the resolution pass, and cycle-safe traversal.

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::model::{ModelId, ModelRegistry};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
    BelongsTo,
}

impl RelationKind {
    /// Accepts the usual ORM spellings (`has_many`, `one_to_many`, `HasMany`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "hasone" | "onetoone" | "morphone" => Some(RelationKind::OneToOne),
            "hasmany" | "onetomany" | "morphmany" | "hasmanythrough" => {
                Some(RelationKind::OneToMany)
            }
            "manytomany" | "belongstomany" | "morphtomany" => Some(RelationKind::ManyToMany),
            "belongsto" | "manytoone" | "morphto" => Some(RelationKind::BelongsTo),
            _ => None,
        }
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Edge from a model to another model, addressed by name until resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: String,
    pub foreign_key: Option<String>,
    /// Property backing the relation, when declared on a field
    pub field: Option<String>,
    /// Set by [`RelationResolver::resolve`]; `None` means dangling
    #[serde(skip)]
    pub resolved: Option<ModelId>,
}

impl Relation {
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: None,
            field: None,
            resolved: None,
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: Option<String>) -> Self {
        self.foreign_key = foreign_key;
        self
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Schema property name for a relation that has no backing field
    pub fn property_name(&self) -> String {
        let base = snake_case(&self.target);
        if self.kind.is_to_many() {
            pluralize(&base)
        } else {
            base
        }
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh")
    {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

/// Second pass over the full model set
pub struct RelationResolver;

impl RelationResolver {
    /// Resolve every relation target against the registry.
    ///
    /// Dangling relations stay in place with `resolved == None` and are reported.
    /// Returns the number of dangling relations.
    pub fn resolve(registry: &mut ModelRegistry, sink: &mut dyn DiagnosticSink) -> usize {
        let mut dangling = 0;
        let ids: Vec<ModelId> = registry.ids().collect();
        for id in ids {
            let targets: Vec<(usize, Option<ModelId>)> = registry
                .get(id)
                .relations
                .iter()
                .enumerate()
                .map(|(idx, rel)| (idx, registry.id_of(&rel.target)))
                .collect();

            for (idx, target) in targets {
                let model = registry.get_mut(id);
                let relation = &mut model.relations[idx];
                relation.resolved = target;
                if target.is_none() {
                    dangling += 1;
                    let diagnostic = Diagnostic::resolution(format!(
                        "relation {:?} from `{}` targets unknown model `{}`",
                        relation.kind, model.name, relation.target
                    ))
                    .at(&model.path)
                    .for_declaration(model.name.clone());
                    sink.emit(diagnostic);
                }
            }
        }
        debug!("Resolved relations, {} dangling", dangling);
        dangling
    }

    /// Direct neighbours of a model: resolved relations plus object-typed fields
    pub fn neighbours(registry: &ModelRegistry, id: ModelId) -> BTreeSet<ModelId> {
        let model = registry.get(id);
        let mut out: BTreeSet<ModelId> =
            model.relations.iter().filter_map(|r| r.resolved).collect();
        for field in &model.fields {
            out.extend(
                field
                    .ty
                    .referenced_models()
                    .iter()
                    .filter_map(|name| registry.id_of(name)),
            );
        }
        out
    }

    /// Every model reachable from `start` (including it), breadth-first.
    ///
    /// The visited set makes this terminate on cyclic graphs.
    pub fn reachable(registry: &ModelRegistry, start: ModelId) -> Vec<ModelId> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            queue.extend(Self::neighbours(registry, id));
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Diagnostics};
    use crate::model::Model;
    use std::path::PathBuf;

    fn model(name: &str, relations: Vec<Relation>) -> Model {
        let mut model = Model::new(name, PathBuf::from(format!("{}.rs", name.to_lowercase())));
        model.relations = relations;
        model
    }

    #[test]
    fn test_relation_kind_spellings() {
        assert_eq!(RelationKind::parse("has_many"), Some(RelationKind::OneToMany));
        assert_eq!(RelationKind::parse("HasOne"), Some(RelationKind::OneToOne));
        assert_eq!(RelationKind::parse("belongs_to_many"), Some(RelationKind::ManyToMany));
        assert_eq!(RelationKind::parse("belongs_to"), Some(RelationKind::BelongsTo));
        assert_eq!(RelationKind::parse("derive"), None);
    }

    #[test]
    fn test_property_names() {
        assert_eq!(
            Relation::new(RelationKind::OneToMany, "BlogPost").property_name(),
            "blog_posts"
        );
        assert_eq!(
            Relation::new(RelationKind::ManyToMany, "Category").property_name(),
            "categories"
        );
        assert_eq!(
            Relation::new(RelationKind::BelongsTo, "User").property_name(),
            "user"
        );
    }

    #[test]
    fn test_resolve_and_dangling() {
        let mut registry = ModelRegistry::new();
        let mut diags = Diagnostics::new();
        registry.insert(
            model(
                "User",
                vec![
                    Relation::new(RelationKind::OneToMany, "Post"),
                    Relation::new(RelationKind::OneToOne, "Profile"),
                ],
            ),
            &mut diags,
        );
        registry.insert(model("Post", vec![]), &mut diags);

        let dangling = RelationResolver::resolve(&mut registry, &mut diags);
        assert_eq!(dangling, 1);
        assert_eq!(diags.count(DiagnosticKind::Resolution), 1);

        let user = registry.by_name("User").unwrap();
        assert_eq!(user.relations[0].resolved, registry.id_of("Post"));
        assert_eq!(user.relations[1].resolved, None);
    }

    #[test]
    fn test_reachable_terminates_on_cycle() {
        let mut registry = ModelRegistry::new();
        let mut diags = Diagnostics::new();
        let a = registry
            .insert(model("A", vec![Relation::new(RelationKind::OneToMany, "B")]), &mut diags)
            .unwrap();
        registry.insert(model("B", vec![Relation::new(RelationKind::BelongsTo, "A")]), &mut diags);
        registry.insert(model("C", vec![Relation::new(RelationKind::OneToOne, "C")]), &mut diags);
        RelationResolver::resolve(&mut registry, &mut diags);

        let reached = RelationResolver::reachable(&registry, a);
        assert_eq!(reached.len(), 2);

        let c = registry.id_of("C").unwrap();
        assert_eq!(RelationResolver::reachable(&registry, c), vec![c]);
    }
}
