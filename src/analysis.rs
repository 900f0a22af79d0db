//! Per-file analysis: the unit that is cached and replayed.

use crate::declaration::{Declaration, DeclarationKind, Literal};
use crate::diagnostics::Diagnostic;
use crate::extractor::RouterFragment;
use crate::fingerprint::Fingerprint;
use crate::model::{Model, ModelAnalyzer};
use crate::parser::SourceUnit;
use crate::validation::{RuleSet, ValidationRuleAnalyzer};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Everything derived from one source file without looking at other files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub module_path: String,
    pub imports: Vec<String>,
    pub declarations: Vec<Declaration>,
    pub models: Vec<Model>,
    /// Rule-sets keyed by the type they validate
    pub rule_sets: BTreeMap<String, RuleSet>,
    pub routers: Vec<RouterFragment>,
    /// Diagnostics raised while analyzing this file; replayed on cache hits
    pub diagnostics: Vec<Diagnostic>,
}

pub struct FileAnalyzer;

impl FileAnalyzer {
    pub fn analyze(unit: SourceUnit) -> FileAnalysis {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let mut function_defaults = HashMap::new();
        collect_function_defaults(&unit.declarations, &mut function_defaults);

        let analyzer = ModelAnalyzer::new(&unit.path, &function_defaults);
        let mut models = Vec::new();
        let mut rule_sets: BTreeMap<String, RuleSet> = BTreeMap::new();
        visit_declarations(&unit.declarations, &mut |decl| {
            if let Some(model) = analyzer.analyze(decl, &mut diagnostics) {
                models.push(model);
            }
            if matches!(decl.kind, DeclarationKind::Struct | DeclarationKind::Impl) {
                if let Some((target, set)) = ValidationRuleAnalyzer::analyze(decl) {
                    rule_sets.entry(target).or_default().merge(set);
                }
            }
        });

        debug!(
            "Analyzed {}: {} models, {} rule-sets",
            unit.path.display(),
            models.len(),
            rule_sets.len()
        );

        FileAnalysis {
            path: unit.path,
            fingerprint: unit.fingerprint,
            module_path: unit.module_path,
            imports: unit.imports,
            declarations: unit.declarations,
            models,
            rule_sets,
            routers: unit.routers,
            diagnostics,
        }
    }
}

/// Top-level and module-nested declarations, depth first
fn visit_declarations<'a>(declarations: &'a [Declaration], f: &mut dyn FnMut(&'a Declaration)) {
    for decl in declarations {
        f(decl);
        if decl.kind == DeclarationKind::Module {
            visit_declarations(&decl.children, f);
        }
    }
}

/// Literal results of functions, for `#[serde(default = "path")]`
fn collect_function_defaults(declarations: &[Declaration], out: &mut HashMap<String, Literal>) {
    visit_declarations(declarations, &mut |decl| {
        let callables: Vec<&Declaration> = match decl.kind {
            DeclarationKind::Function => vec![decl],
            DeclarationKind::Impl => decl.children_of(DeclarationKind::Method).collect(),
            _ => Vec::new(),
        };
        for callable in callables {
            if let Some(value) = &callable.return_value {
                out.entry(callable.name.clone()).or_insert_with(|| value.clone());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::AstParser;
    use crate::type_ref::{ScalarKind, TypeRef};
    use std::path::Path;

    fn analyze(code: &str) -> FileAnalysis {
        let unit = AstParser::parse_source(
            Path::new("src/models.rs"),
            code,
            Fingerprint::compute(code.as_bytes()),
            "models",
        )
        .unwrap();
        FileAnalyzer::analyze(unit)
    }

    #[test]
    fn test_models_and_serde_default_functions() {
        let analysis = analyze(
            r#"
fn default_per_page() -> u32 { 25 }

pub struct ListQuery {
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub cursor: Option<String>,
}

pub mod nested {
    pub enum Order { Asc, Desc }
}
"#,
        );

        assert_eq!(analysis.models.len(), 2);
        let query = &analysis.models[0];
        assert_eq!(query.fields[0].default, Some(Literal::Int(25)));
        assert!(!query.fields[0].required);
        assert_eq!(
            query.fields[1].ty,
            TypeRef::nullable(TypeRef::scalar(ScalarKind::String))
        );
        assert_eq!(analysis.models[1].name, "Order");
    }

    #[test]
    fn test_rule_sets_from_struct_and_impl_merge() {
        let analysis = analyze(
            r#"
#[rules(name = "required|string")]
pub struct CreateUser {
    pub name: String,
    pub age: Option<i32>,
}

impl CreateUser {
    fn rules() -> Vec<(&'static str, &'static str)> {
        vec![("age", "integer|min:0")]
    }
}
"#,
        );

        let set = &analysis.rule_sets["CreateUser"];
        assert!(set.get("name").unwrap().is_required());
        assert!(!set.get("age").unwrap().is_required());
        assert!(set.get("age").is_some());
    }

    #[test]
    fn test_type_conflicts_are_recorded_per_file() {
        let analysis = analyze(
            r#"
pub struct Item {
    /// @var string
    pub count: i32,
}
"#,
        );
        assert_eq!(analysis.diagnostics.len(), 1);
        assert_eq!(analysis.diagnostics[0].path, Some(PathBuf::from("src/models.rs")));
    }
}
