//! Validation-rule extraction.
//!
//! Rules come as small strings (`required|string|max:255`) or as structured
//! attributes from the `validator` crate. Rules on one field are conjunctive.
//! Rule names without a known meaning are kept as [`Constraint::Opaque`].

use crate::annotation::{Annotation, Argument, KnownAnnotation};
use crate::declaration::{Declaration, DeclarationKind, Literal};
use crate::type_ref::{ScalarKind, TypeRef};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Date,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Required,
    Nullable,
    Type(RuleType),
    /// OpenAPI string format (`email`, `uri`, `uuid`, `ipv4`, ...)
    Format(String),
    Enum(Vec<String>),
    Min(f64),
    Max(f64),
    Pattern(String),
    Opaque { name: String, params: Vec<String> },
}

/// Constraints declared for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    pub constraints: Vec<Constraint>,
}

impl ValidationRule {
    pub fn is_required(&self) -> bool {
        self.constraints.contains(&Constraint::Required)
    }

    pub fn is_nullable(&self) -> bool {
        self.constraints.contains(&Constraint::Nullable)
    }

    pub fn rule_type(&self) -> Option<RuleType> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Type(t) => Some(*t),
            _ => None,
        })
    }

    /// TypeRef implied by the rules alone, for fields with no other type signal
    pub fn implied_type(&self) -> TypeRef {
        let base = match self.rule_type() {
            Some(RuleType::String) => TypeRef::scalar(ScalarKind::String),
            Some(RuleType::Integer) => TypeRef::scalar(ScalarKind::Integer),
            Some(RuleType::Number) => TypeRef::scalar(ScalarKind::Number),
            Some(RuleType::Boolean) => TypeRef::scalar(ScalarKind::Boolean),
            Some(RuleType::Array) => TypeRef::array(TypeRef::Unknown),
            Some(RuleType::Date) => TypeRef::scalar(ScalarKind::Date),
            Some(RuleType::File) => TypeRef::scalar(ScalarKind::Binary),
            None if self
                .constraints
                .iter()
                .any(|c| matches!(c, Constraint::Format(_) | Constraint::Pattern(_) | Constraint::Enum(_))) =>
            {
                TypeRef::scalar(ScalarKind::String)
            }
            None => TypeRef::Unknown,
        };
        if self.is_nullable() {
            TypeRef::nullable(base)
        } else {
            base
        }
    }
}

/// Field rules in first-declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<ValidationRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&ValidationRule> {
        self.rules.iter().find(|r| r.field == field)
    }

    /// Add constraints for a field, conjunctively with any already present
    pub fn add(&mut self, field: &str, constraints: Vec<Constraint>) {
        if constraints.is_empty() {
            return;
        }
        match self.rules.iter_mut().find(|r| r.field == field) {
            Some(rule) => {
                for constraint in constraints {
                    if !rule.constraints.contains(&constraint) {
                        rule.constraints.push(constraint);
                    }
                }
            }
            None => self.rules.push(ValidationRule {
                field: field.to_string(),
                constraints,
            }),
        }
    }

    pub fn merge(&mut self, other: RuleSet) {
        for rule in other.rules {
            self.add(&rule.field, rule.constraints);
        }
    }
}

pub struct ValidationRuleAnalyzer;

impl ValidationRuleAnalyzer {
    /// Parse `rule|rule:p1,p2|...`
    pub fn parse_rule_string(text: &str) -> Vec<Constraint> {
        text.split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .flat_map(Self::parse_single_rule)
            .collect()
    }

    /// Parse one rule token; `between:1,10` expands to two constraints
    pub fn parse_single_rule(token: &str) -> Vec<Constraint> {
        let (name, params) = match token.split_once(':') {
            Some((name, params)) => (name.trim(), params.trim()),
            None => (token.trim(), ""),
        };
        let list: Vec<String> = if params.is_empty() {
            Vec::new()
        } else if name == "regex" || name == "not_regex" {
            vec![params.to_string()]
        } else {
            params.split(',').map(|p| p.trim().to_string()).collect()
        };
        let number = |idx: usize| list.get(idx).and_then(|p| p.parse::<f64>().ok());
        let opaque = || {
            vec![Constraint::Opaque {
                name: name.to_string(),
                params: list.clone(),
            }]
        };

        match name {
            "required" => vec![Constraint::Required],
            "nullable" | "optional" => vec![Constraint::Nullable],
            "string" | "str" => vec![Constraint::Type(RuleType::String)],
            "integer" | "int" => vec![Constraint::Type(RuleType::Integer)],
            "numeric" | "number" | "float" | "decimal" => vec![Constraint::Type(RuleType::Number)],
            "boolean" | "bool" => vec![Constraint::Type(RuleType::Boolean)],
            "array" | "list" => vec![Constraint::Type(RuleType::Array)],
            "date" => vec![Constraint::Type(RuleType::Date)],
            "file" | "image" => vec![Constraint::Type(RuleType::File)],
            "email" => vec![Constraint::Format("email".to_string())],
            "url" | "active_url" => vec![Constraint::Format("uri".to_string())],
            "uuid" => vec![Constraint::Format("uuid".to_string())],
            "date_format" => vec![Constraint::Format("date-time".to_string())],
            "ip" | "ipv4" => vec![Constraint::Format("ipv4".to_string())],
            "ipv6" => vec![Constraint::Format("ipv6".to_string())],
            "in" if !list.is_empty() => vec![Constraint::Enum(list.clone())],
            "min" => number(0).map(|n| vec![Constraint::Min(n)]).unwrap_or_else(opaque),
            "max" => number(0).map(|n| vec![Constraint::Max(n)]).unwrap_or_else(opaque),
            "size" => number(0)
                .map(|n| vec![Constraint::Min(n), Constraint::Max(n)])
                .unwrap_or_else(opaque),
            "between" => match (number(0), number(1)) {
                (Some(min), Some(max)) => vec![Constraint::Min(min), Constraint::Max(max)],
                _ => opaque(),
            },
            "regex" if !list.is_empty() => vec![Constraint::Pattern(strip_delimiters(&list[0]))],
            _ => opaque(),
        }
    }

    /// Rules given as a string or as an array of single-rule strings
    pub fn parse_rule_literal(value: &Literal) -> Vec<Constraint> {
        match value {
            Literal::Str(text) => Self::parse_rule_string(text),
            Literal::Array(items) => items
                .iter()
                .filter_map(Literal::to_text)
                .flat_map(|item| Self::parse_single_rule(&item))
                .collect(),
            other => {
                debug!("Ignoring non-string rule value {:?}", other);
                Vec::new()
            }
        }
    }

    /// Build a rule-set from `(field, rules)` pairs
    #[cfg(test)]
    pub(crate) fn parse_rule_set(pairs: &[(&str, &str)]) -> RuleSet {
        let mut set = RuleSet::new();
        for (field, rules) in pairs {
            set.add(field, Self::parse_rule_string(rules));
        }
        set
    }

    /// Extract the rule-set a declaration carries, with the type name it applies to.
    ///
    /// Structs contribute struct-level `#[rules(...)]` plus field-level rule and
    /// `#[validate]` attributes. Impl blocks contribute a `fn rules()` whose body
    /// evaluates to `(field, rules)` pairs. Functions contribute handler-level rules.
    pub fn analyze(decl: &Declaration) -> Option<(String, RuleSet)> {
        let mut set = RuleSet::new();
        let target = match decl.kind {
            DeclarationKind::Struct => {
                Self::collect_rules_annotations(&decl.annotations, &mut set);
                for field in decl.children_of(DeclarationKind::Field) {
                    Self::collect_field_rules(&field.name, &field.annotations, &mut set);
                }
                decl.name.clone()
            }
            DeclarationKind::Impl => {
                let rules_fn = decl
                    .children_of(DeclarationKind::Method)
                    .find(|m| m.name == "rules" || m.name == "validation_rules")?;
                if let Some(value) = &rules_fn.return_value {
                    Self::collect_pairs(value, &mut set);
                }
                Self::collect_rules_annotations(&rules_fn.annotations, &mut set);
                decl.name.clone()
            }
            DeclarationKind::Function | DeclarationKind::Method => {
                Self::collect_rules_annotations(&decl.annotations, &mut set);
                decl.name.clone()
            }
            _ => return None,
        };
        if set.is_empty() {
            None
        } else {
            Some((target, set))
        }
    }

    fn collect_rules_annotations(annotations: &[String], set: &mut RuleSet) {
        for ann in Annotation::parse_all(annotations) {
            if let KnownAnnotation::Rules(args) = ann.classify() {
                Self::collect_named_args(&args, set);
            }
        }
    }

    fn collect_named_args(args: &[Argument], set: &mut RuleSet) {
        for arg in args {
            match &arg.key {
                Some(field) => set.add(field, Self::parse_rule_literal(&arg.value)),
                None => Self::collect_pairs(&arg.value, set),
            }
        }
    }

    /// `[("name", "required"), ...]` or `{name: "required"}`
    fn collect_pairs(value: &Literal, set: &mut RuleSet) {
        match value {
            Literal::Array(items) => {
                for item in items {
                    if let Literal::Array(pair) = item {
                        if let [field, rules] = pair.as_slice() {
                            if let Some(field) = field.to_text() {
                                set.add(&field, Self::parse_rule_literal(rules));
                            }
                        }
                    }
                }
            }
            Literal::Map(entries) => {
                for (field, rules) in entries {
                    set.add(field, Self::parse_rule_literal(rules));
                }
            }
            _ => {}
        }
    }

    fn collect_field_rules(field: &str, annotations: &[String], set: &mut RuleSet) {
        for ann in Annotation::parse_all(annotations) {
            match ann.classify() {
                KnownAnnotation::Rules(args) => {
                    for arg in &args {
                        if arg.key.is_none() {
                            set.add(field, Self::parse_rule_literal(&arg.value));
                        }
                    }
                }
                KnownAnnotation::Validate(args) => {
                    set.add(field, Self::validator_constraints(&args));
                }
                _ => {}
            }
        }
    }

    /// Constraints from `validator`-crate attribute arguments
    fn validator_constraints(args: &[Argument]) -> Vec<Constraint> {
        let mut out = Vec::new();
        for arg in args {
            let (name, params) = match (&arg.key, &arg.value) {
                (None, Literal::Raw(flag)) => (flag.as_str(), None),
                (Some(key), value) => (key.as_str(), Some(value)),
                _ => continue,
            };
            let entry = |key: &str| -> Option<f64> {
                match params {
                    Some(Literal::Map(entries)) => {
                        entries.iter().find(|(k, _)| k == key).and_then(|(_, v)| match v {
                            Literal::Int(i) => Some(*i as f64),
                            Literal::Float(f) => Some(*f),
                            _ => None,
                        })
                    }
                    _ => None,
                }
            };
            match name {
                "required" => out.push(Constraint::Required),
                "email" => out.push(Constraint::Format("email".to_string())),
                "url" => out.push(Constraint::Format("uri".to_string())),
                "ip" | "ipv4" => out.push(Constraint::Format("ipv4".to_string())),
                "ipv6" => out.push(Constraint::Format("ipv6".to_string())),
                "length" | "range" => {
                    if let Some(equal) = entry("equal") {
                        out.push(Constraint::Min(equal));
                        out.push(Constraint::Max(equal));
                    }
                    if let Some(min) = entry("min") {
                        out.push(Constraint::Min(min));
                    }
                    if let Some(max) = entry("max") {
                        out.push(Constraint::Max(max));
                    }
                }
                other => out.push(Constraint::Opaque {
                    name: other.to_string(),
                    params: match params {
                        Some(Literal::Map(entries)) => entries
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v.to_text().unwrap_or_default()))
                            .collect(),
                        Some(value) => value.to_text().into_iter().collect(),
                        None => Vec::new(),
                    },
                }),
            }
        }
        out
    }
}

fn strip_delimiters(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('/') {
        if let Some(end) = trimmed.rfind('/') {
            if end > 0 {
                return trimmed[1..end].to_string();
            }
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Span;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rule_set_required_and_types() {
        let set = ValidationRuleAnalyzer::parse_rule_set(&[
            ("name", "required|string"),
            ("age", "integer"),
        ]);

        let name = set.get("name").unwrap();
        assert!(name.is_required());
        assert_eq!(name.rule_type(), Some(RuleType::String));
        let age = set.get("age").unwrap();
        assert!(!age.is_required());
        assert_eq!(age.rule_type(), Some(RuleType::Integer));
    }

    #[test]
    fn test_parameterized_rules() {
        let constraints = ValidationRuleAnalyzer::parse_rule_string("between:1,10|in:a,b|regex:/^[a-z]+$/");
        assert_eq!(
            constraints,
            vec![
                Constraint::Min(1.0),
                Constraint::Max(10.0),
                Constraint::Enum(vec!["a".to_string(), "b".to_string()]),
                Constraint::Pattern("^[a-z]+$".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_rule_kept_opaque() {
        let constraints = ValidationRuleAnalyzer::parse_rule_string("unique:users,email|required");
        assert_eq!(
            constraints[0],
            Constraint::Opaque {
                name: "unique".to_string(),
                params: vec!["users".to_string(), "email".to_string()],
            }
        );
        assert_eq!(constraints[1], Constraint::Required);
    }

    #[test]
    fn test_merge_is_conjunctive() {
        let mut set = ValidationRuleAnalyzer::parse_rule_set(&[("email", "email")]);
        set.merge(ValidationRuleAnalyzer::parse_rule_set(&[
            ("email", "required|email"),
            ("name", "string"),
        ]));
        assert_eq!(
            set.get("email").unwrap().constraints,
            vec![Constraint::Format("email".to_string()), Constraint::Required]
        );
        assert_eq!(set.rules.len(), 2);
    }

    #[test]
    fn test_struct_level_and_field_level_rules() {
        let mut decl = Declaration::new(DeclarationKind::Struct, "CreateUser", Span::default());
        decl.annotations = vec![r#"rules (name = "required|string", tags = ["array", "max:5"])"#.to_string()];
        let mut email = Declaration::new(DeclarationKind::Field, "email", Span::default());
        email.annotations = vec!["validate (email, length (min = 3, max = 120))".to_string()];
        let mut nick = Declaration::new(DeclarationKind::Field, "nick", Span::default());
        nick.annotations = vec![r#"rule = "nullable|max:20""#.to_string()];
        decl.children = vec![email, nick];

        let (target, set) = ValidationRuleAnalyzer::analyze(&decl).unwrap();
        assert_eq!(target, "CreateUser");
        assert!(set.get("name").unwrap().is_required());
        assert_eq!(
            set.get("tags").unwrap().constraints,
            vec![Constraint::Type(RuleType::Array), Constraint::Max(5.0)]
        );
        assert_eq!(
            set.get("email").unwrap().constraints,
            vec![
                Constraint::Format("email".to_string()),
                Constraint::Min(3.0),
                Constraint::Max(120.0),
            ]
        );
        assert!(set.get("nick").unwrap().is_nullable());
    }

    #[test]
    fn test_rules_function_pairs() {
        let mut imp = Declaration::new(DeclarationKind::Impl, "StoreItem", Span::default());
        imp.type_decl = Some("StoreItem".to_string());
        let mut rules = Declaration::new(DeclarationKind::Method, "rules", Span::default());
        rules.return_value = Some(Literal::Array(vec![Literal::Array(vec![
            Literal::Str("title".to_string()),
            Literal::Str("required|string|max:100".to_string()),
        ])]));
        imp.children.push(rules);

        let (target, set) = ValidationRuleAnalyzer::analyze(&imp).unwrap();
        assert_eq!(target, "StoreItem");
        assert!(set.get("title").unwrap().is_required());
    }

    #[test]
    fn test_implied_type() {
        let set = ValidationRuleAnalyzer::parse_rule_set(&[("contact", "nullable|email")]);
        assert_eq!(
            set.get("contact").unwrap().implied_type(),
            TypeRef::nullable(TypeRef::scalar(ScalarKind::String))
        );
    }
}
