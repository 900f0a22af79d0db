use crate::declaration::{Declaration, DeclarationKind, Literal, Span, Visibility};
use crate::error::{Error, Result};
use crate::extractor::axum::RouterVisitor;
use crate::extractor::RouterFragment;
use crate::fingerprint::Fingerprint;
use crate::type_resolver::type_text;
use log::{debug, warn};
use quote::ToTokens;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use syn::spanned::Spanned;
use syn::{Attribute, Expr, Fields, FnArg, ImplItem, Item, Pat, Stmt, UseTree};

/// AST parser for Rust source files.
///
/// The `AstParser` uses the `syn` crate to parse Rust source code and lowers the result
/// into a [`SourceUnit`]: a serializable list of [`Declaration`]s plus the file's imports
/// and router fragments. Parsing is pure; reading files is kept in [`AstParser::parse_file`].
///
/// # Example
///
/// ```no_run
/// use openapi_synth::parser::AstParser;
/// use std::path::Path;
///
/// let unit = AstParser::parse_file(Path::new("src/main.rs"), Path::new("."), false).unwrap();
/// println!("Parsed {} declarations", unit.declarations.len());
/// ```
pub struct AstParser;

/// One analyzed file. Replaced wholesale when the file is parsed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Path to the source file
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Module path derived from the file location (`handlers::users`)
    pub module_path: String,
    /// Flattened `use` paths (`axum::routing::get`)
    pub imports: Vec<String>,
    pub declarations: Vec<Declaration>,
    /// Router construction chains found in function bodies
    pub routers: Vec<RouterFragment>,
}

impl AstParser {
    /// Parses source text into a [`SourceUnit`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] with the position reported by `syn` when the text is
    /// not valid Rust.
    pub fn parse_source(
        path: &Path,
        text: &str,
        fingerprint: Fingerprint,
        module_path: &str,
    ) -> Result<SourceUnit> {
        let syntax_tree = syn::parse_file(text).map_err(|e| Error::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
            span: Some(Span::from_span(e.span())),
        })?;

        let mut imports = Vec::new();
        for item in &syntax_tree.items {
            if let Item::Use(use_item) = item {
                flatten_use_tree(&use_item.tree, String::new(), &mut imports);
            }
        }

        let declarations = lower_items(&syntax_tree.items, &[]);
        let routers = RouterVisitor::collect(&syntax_tree, module_path);

        debug!(
            "Parsed {}: {} declarations, {} router fragments",
            path.display(),
            declarations.len(),
            routers.len()
        );

        Ok(SourceUnit {
            path: path.to_path_buf(),
            fingerprint,
            module_path: module_path.to_string(),
            imports,
            declarations,
            routers,
        })
    }

    /// Reads, fingerprints and parses a single file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the Rust source file to parse
    /// * `root` - Project root, used to derive the module path
    /// * `include_mtime` - Whether the fingerprint covers the modification time
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file contains invalid Rust syntax
    pub fn parse_file(path: &Path, root: &Path, include_mtime: bool) -> Result<SourceUnit> {
        debug!("Parsing file: {}", path.display());
        let (fingerprint, content) = Fingerprint::from_file(path, include_mtime)?;
        Self::parse_source(path, &content, fingerprint, &module_path_for(root, path))
    }

    /// Parses multiple Rust source files, continuing even if some fail.
    ///
    /// Returns one result per input path, in input order.
    pub fn parse_files(paths: &[PathBuf], root: &Path, include_mtime: bool) -> Vec<Result<SourceUnit>> {
        debug!("Parsing {} files", paths.len());

        let results: Vec<Result<SourceUnit>> = paths
            .iter()
            .map(|path| {
                Self::parse_file(path, root, include_mtime).inspect_err(|e| {
                    warn!("Failed to parse {}: {}", path.display(), e);
                })
            })
            .collect();

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        debug!(
            "Parsing complete: {} succeeded, {} failed",
            success_count,
            results.len() - success_count
        );

        results
    }
}

/// Module path of a file relative to the project root.
///
/// `src/handlers/users.rs` becomes `handlers::users`; `mod.rs`, `lib.rs` and
/// `main.rs` name their parent module.
pub fn module_path_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if segments.first().map(String::as_str) == Some("src") {
        segments.remove(0);
    }
    if let Some(last) = segments.pop() {
        let stem = last.strip_suffix(".rs").unwrap_or(&last).to_string();
        if !matches!(stem.as_str(), "mod" | "lib" | "main") {
            segments.push(stem);
        }
    }
    segments.join("::")
}

fn flatten_use_tree(tree: &UseTree, prefix: String, out: &mut Vec<String>) {
    let join = |name: String| {
        if prefix.is_empty() {
            name
        } else {
            format!("{}::{}", prefix, name)
        }
    };
    match tree {
        UseTree::Path(path) => flatten_use_tree(&path.tree, join(path.ident.to_string()), out),
        UseTree::Name(name) => out.push(join(name.ident.to_string())),
        UseTree::Rename(rename) => out.push(join(rename.ident.to_string())),
        UseTree::Glob(_) => out.push(join("*".to_string())),
        UseTree::Group(group) => {
            for item in &group.items {
                flatten_use_tree(item, prefix.clone(), out);
            }
        }
    }
}

fn docs_of(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            syn::Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }) => Some(s.value()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn annotations_of(attrs: &[Attribute]) -> Vec<String> {
    attrs
        .iter()
        .filter(|a| !a.path().is_ident("doc"))
        .map(|a| a.meta.to_token_stream().to_string())
        .collect()
}

fn declaration(
    kind: DeclarationKind,
    name: String,
    attrs: &[Attribute],
    vis: Option<&syn::Visibility>,
    span: proc_macro2::Span,
) -> Declaration {
    let mut decl = Declaration::new(kind, name, Span::from_span(span));
    decl.docs = docs_of(attrs);
    decl.annotations = annotations_of(attrs);
    if let Some(vis) = vis {
        decl.visibility = Visibility::from(vis);
    }
    decl
}

fn type_params(generics: &syn::Generics) -> Vec<String> {
    generics.type_params().map(|p| p.ident.to_string()).collect()
}

fn lower_items(items: &[Item], outer_generics: &[String]) -> Vec<Declaration> {
    let defaults = default_impls(items);
    let mut out = Vec::new();

    for item in items {
        match item {
            Item::Struct(item_struct) => {
                let mut decl = declaration(
                    DeclarationKind::Struct,
                    item_struct.ident.to_string(),
                    &item_struct.attrs,
                    Some(&item_struct.vis),
                    item_struct.span(),
                );
                decl.generics = type_params(&item_struct.generics);
                let field_defaults = defaults.get(&decl.name);
                match &item_struct.fields {
                    Fields::Named(named) => {
                        for field in &named.named {
                            let Some(ident) = &field.ident else { continue };
                            let mut child = declaration(
                                DeclarationKind::Field,
                                ident.to_string(),
                                &field.attrs,
                                Some(&field.vis),
                                field.span(),
                            );
                            child.type_decl = Some(type_text(&field.ty));
                            child.default_value = field_defaults
                                .and_then(|d| d.get(&child.name))
                                .cloned();
                            decl.children.push(child);
                        }
                    }
                    // tuple and unit structs carry their shape as type text and are not models
                    Fields::Unnamed(unnamed) => {
                        decl.type_decl = Some(unnamed.to_token_stream().to_string());
                    }
                    Fields::Unit => decl.type_decl = Some("()".to_string()),
                }
                out.push(decl);
            }
            Item::Enum(item_enum) => {
                let mut decl = declaration(
                    DeclarationKind::Enum,
                    item_enum.ident.to_string(),
                    &item_enum.attrs,
                    Some(&item_enum.vis),
                    item_enum.span(),
                );
                decl.generics = type_params(&item_enum.generics);
                for variant in &item_enum.variants {
                    decl.children.push(declaration(
                        DeclarationKind::Variant,
                        variant.ident.to_string(),
                        &variant.attrs,
                        None,
                        variant.span(),
                    ));
                }
                out.push(decl);
            }
            Item::Fn(item_fn) => {
                let mut decl = lower_fn(
                    DeclarationKind::Function,
                    &item_fn.sig,
                    &item_fn.attrs,
                    Some(&item_fn.vis),
                    &item_fn.block,
                    outer_generics,
                );
                decl.span = Span::from_span(item_fn.span());
                out.push(decl);
            }
            Item::Impl(item_impl) => {
                let Some(name) = crate::type_resolver::type_name(&item_impl.self_ty) else {
                    continue;
                };
                let mut decl = declaration(
                    DeclarationKind::Impl,
                    name,
                    &item_impl.attrs,
                    None,
                    item_impl.span(),
                );
                decl.type_decl = Some(type_text(&item_impl.self_ty));
                decl.generics = type_params(&item_impl.generics);
                for impl_item in &item_impl.items {
                    if let ImplItem::Fn(method) = impl_item {
                        let mut child = lower_fn(
                            DeclarationKind::Method,
                            &method.sig,
                            &method.attrs,
                            Some(&method.vis),
                            &method.block,
                            &decl.generics,
                        );
                        child.span = Span::from_span(method.span());
                        decl.children.push(child);
                    }
                }
                out.push(decl);
            }
            Item::Mod(item_mod) => {
                let mut decl = declaration(
                    DeclarationKind::Module,
                    item_mod.ident.to_string(),
                    &item_mod.attrs,
                    Some(&item_mod.vis),
                    item_mod.span(),
                );
                if let Some((_, items)) = &item_mod.content {
                    decl.children = lower_items(items, outer_generics);
                }
                out.push(decl);
            }
            _ => {}
        }
    }
    out
}

fn lower_fn(
    kind: DeclarationKind,
    sig: &syn::Signature,
    attrs: &[Attribute],
    vis: Option<&syn::Visibility>,
    block: &syn::Block,
    outer_generics: &[String],
) -> Declaration {
    let mut decl = declaration(kind, sig.ident.to_string(), attrs, vis, sig.span());
    decl.generics = outer_generics.to_vec();
    decl.generics.extend(type_params(&sig.generics));
    if let syn::ReturnType::Type(_, ty) = &sig.output {
        decl.type_decl = Some(type_text(ty));
    }
    decl.return_value = tail_literal(block);

    for input in &sig.inputs {
        let FnArg::Typed(pat_type) = input else {
            continue;
        };
        let mut bindings = Vec::new();
        collect_bindings(&pat_type.pat, &mut bindings);
        let name = match bindings.as_slice() {
            [single] => single.clone(),
            _ => pat_type.pat.to_token_stream().to_string(),
        };
        let mut param = declaration(
            DeclarationKind::Param,
            name,
            &pat_type.attrs,
            None,
            pat_type.span(),
        );
        param.type_decl = Some(type_text(&pat_type.ty));
        param.bindings = bindings;
        decl.children.push(param);
    }
    decl
}

/// Names bound by a parameter pattern
fn collect_bindings(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(ident) => out.push(ident.ident.to_string()),
        Pat::TupleStruct(tuple) => tuple.elems.iter().for_each(|p| collect_bindings(p, out)),
        Pat::Tuple(tuple) => tuple.elems.iter().for_each(|p| collect_bindings(p, out)),
        Pat::Struct(pat_struct) => pat_struct
            .fields
            .iter()
            .for_each(|f| collect_bindings(&f.pat, out)),
        Pat::Reference(reference) => collect_bindings(&reference.pat, out),
        Pat::Type(pat_type) => collect_bindings(&pat_type.pat, out),
        Pat::Paren(paren) => collect_bindings(&paren.pat, out),
        _ => {}
    }
}

/// Literal value of a block's tail expression, if it is one
fn tail_literal(block: &syn::Block) -> Option<Literal> {
    let literal = match block.stmts.last()? {
        Stmt::Expr(expr, None) => Literal::from_expr(expr),
        Stmt::Expr(Expr::Return(ret), _) => Literal::from_expr(ret.expr.as_deref()?),
        // `vec![..]` in tail position parses as a statement macro
        Stmt::Macro(stmt) if stmt.semi_token.is_none() => {
            Literal::from_expr(&Expr::Macro(syn::ExprMacro {
                attrs: Vec::new(),
                mac: stmt.mac.clone(),
            }))
        }
        _ => return None,
    };
    if literal.is_raw() {
        None
    } else {
        Some(literal)
    }
}

/// Field defaults from `impl Default for T { fn default() -> Self { Self { .. } } }`
fn default_impls(items: &[Item]) -> HashMap<String, HashMap<String, Literal>> {
    let mut out = HashMap::new();
    for item in items {
        let Item::Impl(item_impl) = item else { continue };
        let is_default = item_impl
            .trait_
            .as_ref()
            .and_then(|(_, path, _)| path.segments.last())
            .is_some_and(|s| s.ident == "Default");
        if !is_default {
            continue;
        }
        let Some(name) = crate::type_resolver::type_name(&item_impl.self_ty) else {
            continue;
        };
        let body = item_impl.items.iter().find_map(|i| match i {
            ImplItem::Fn(f) if f.sig.ident == "default" => tail_literal(&f.block),
            _ => None,
        });
        if let Some(Literal::Map(entries)) = body {
            let fields = entries
                .into_iter()
                .filter(|(_, v)| !v.is_raw())
                .collect::<HashMap<_, _>>();
            out.insert(name, fields);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    /// Helper function to create a temporary file with content
    fn create_temp_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let file_path = dir.path().join(name);
        let mut file = fs::File::create(&file_path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file_path
    }

    fn parse(code: &str) -> SourceUnit {
        AstParser::parse_source(
            Path::new("test.rs"),
            code,
            Fingerprint::compute(code.as_bytes()),
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_valid_rust_file() {
        let temp_dir = TempDir::new().unwrap();
        let valid_code = r#"
            use std::collections::HashMap;

            pub struct User {
                pub id: u32,
                pub name: String,
            }

            pub fn get_user(id: u32) -> Option<User> {
                None
            }
        "#;

        let file_path = create_temp_file(&temp_dir, "valid.rs", valid_code);
        let unit = AstParser::parse_file(&file_path, temp_dir.path(), false).unwrap();

        assert_eq!(unit.path, file_path);
        assert_eq!(unit.module_path, "valid");
        assert_eq!(unit.imports, vec!["std::collections::HashMap".to_string()]);
        assert_eq!(unit.declarations.len(), 2);

        let user = &unit.declarations[0];
        assert_eq!(user.kind, DeclarationKind::Struct);
        assert_eq!(user.children.len(), 2);
        assert_eq!(user.children[0].type_decl.as_deref(), Some("u32"));

        let get_user = &unit.declarations[1];
        assert_eq!(get_user.type_decl.as_deref(), Some("Option<User>"));
        assert_eq!(get_user.return_value, Some(Literal::Null));
        assert_eq!(get_user.children[0].name, "id");
    }

    #[test]
    fn test_parse_invalid_rust_file() {
        let temp_dir = TempDir::new().unwrap();
        let invalid_code = r#"
            pub struct User {
                pub id: u32
                pub name: String
            }
        "#;

        let file_path = create_temp_file(&temp_dir, "invalid.rs", invalid_code);
        let result = AstParser::parse_file(&file_path, temp_dir.path(), false);

        match result {
            Err(Error::Parse { file, span, .. }) => {
                assert_eq!(file, file_path);
                assert!(span.is_some());
            }
            other => panic!("Expected parse error, got {:?}", other.map(|u| u.path)),
        }
    }

    #[test]
    fn test_parse_nonexistent_file() {
        let result = AstParser::parse_file(Path::new("/nonexistent/file.rs"), Path::new("/"), false);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_files_batch() {
        let temp_dir = TempDir::new().unwrap();

        let file1 = create_temp_file(&temp_dir, "file1.rs", "pub fn hello() {}");
        let file2 = create_temp_file(&temp_dir, "file2.rs", "pub struct World;");
        let file3 = create_temp_file(&temp_dir, "file3.rs", "pub fn broken( {");

        let paths = vec![file1.clone(), file2, file3];
        let results = AstParser::parse_files(&paths, temp_dir.path(), false);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
        assert_eq!(results[0].as_ref().unwrap().path, file1);
    }

    #[test]
    fn test_docs_attributes_and_spans() {
        let unit = parse(
            r#"
/// A user account
///
/// @deprecated
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Login name
    #[serde(rename = "login")]
    pub user_name: String,
}
"#,
        );
        let account = &unit.declarations[0];
        assert_eq!(
            account.docs.as_deref(),
            Some(" A user account\n\n @deprecated")
        );
        assert_eq!(account.annotations.len(), 2);
        assert!(account.annotations[1].starts_with("serde"));
        assert!(account.span.start_line >= 2);
        assert!(account.span.end_line > account.span.start_line);

        let field = &account.children[0];
        assert_eq!(field.docs.as_deref(), Some(" Login name"));
        assert_eq!(field.annotations.len(), 1);
    }

    #[test]
    fn test_default_impl_values() {
        let unit = parse(
            r#"
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub sort: String,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 20, sort: compute_sort() }
    }
}
"#,
        );
        let fields = &unit.declarations[0].children;
        assert_eq!(fields[0].default_value, Some(Literal::Int(1)));
        assert_eq!(fields[1].default_value, Some(Literal::Int(20)));
        assert_eq!(fields[2].default_value, None);

        let imp = &unit.declarations[1];
        assert_eq!(imp.kind, DeclarationKind::Impl);
        assert_eq!(imp.name, "Pagination");
    }

    #[test]
    fn test_param_bindings_and_methods() {
        let unit = parse(
            r#"
impl UserController {
    pub async fn show(Path((org, id)): Path<(String, i64)>, State(db): State<Db>) -> Json<User> {
        todo!()
    }

    fn rules() -> Vec<(&'static str, &'static str)> {
        vec![("name", "required|string")]
    }
}
"#,
        );
        let imp = &unit.declarations[0];
        let show = &imp.children[0];
        assert_eq!(show.kind, DeclarationKind::Method);
        assert_eq!(show.children[0].bindings, vec!["org".to_string(), "id".to_string()]);
        assert_eq!(show.children[1].name, "db");
        assert_eq!(show.return_value, None);

        let rules = &imp.children[1];
        assert!(matches!(rules.return_value, Some(Literal::Array(_))));
    }

    #[test]
    fn test_tuple_and_unit_structs_keep_shape() {
        let unit = parse("pub struct UserId(pub i64);\npub struct Marker;");
        assert!(unit.declarations[0].type_decl.is_some());
        assert!(unit.declarations[0].children.is_empty());
        assert_eq!(unit.declarations[1].type_decl.as_deref(), Some("()"));
    }

    #[test]
    fn test_inline_modules() {
        let unit = parse("mod inner { pub fn handler() {} }");
        assert_eq!(unit.declarations[0].kind, DeclarationKind::Module);
        assert_eq!(unit.declarations[0].children[0].name, "handler");
    }

    #[test]
    fn test_module_path_for() {
        let root = Path::new("/project");
        assert_eq!(module_path_for(root, Path::new("/project/src/main.rs")), "");
        assert_eq!(
            module_path_for(root, Path::new("/project/src/handlers/users.rs")),
            "handlers::users"
        );
        assert_eq!(
            module_path_for(root, Path::new("/project/src/models/mod.rs")),
            "models"
        );
    }
}
