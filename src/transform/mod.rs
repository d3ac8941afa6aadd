//! Module transformation
//!
//! Turns raw source into an intermediate module record: CommonJS-shaped
//! code ready for registry wrapping, the ordered import list, and the
//! exported names. TypeScript is stripped to JavaScript first; JSON, CSS
//! and static assets get wrapper modules. Invocation always goes through
//! the transform cache, keyed by the hash computed here.

pub mod cache;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::bundler::graph::{ImportKind, ImportRecord, ModuleType};
use crate::bundler::options::{Format, Platform};
use crate::error::{Error, Result};

/// Placeholder the emitter swaps for the asset's emitted URL.
pub const ASSET_URL_PLACEHOLDER: &str = "__RIVET_ASSET_URL__";

/// Options that affect transformed output. Part of the cache key: any
/// change here must force a re-transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    pub module_type: ModuleType,
    pub format: Format,
    pub minify: bool,
    pub platform: Platform,
}

impl TransformOptions {
    /// Digest of raw source bytes plus every option that affects output.
    pub fn source_hash(&self, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([
            0xff,
            self.module_type as u8,
            self.format as u8,
            self.minify as u8,
            self.platform as u8,
        ]);
        hex::encode(hasher.finalize())
    }
}

/// Result of transforming one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    /// CommonJS-shaped module body (wrapped by the emitter)
    pub code: String,

    /// Import sites in source order
    pub imports: Vec<ImportRecord>,

    /// Exported names in source order
    pub exports: Vec<String>,

    /// Whether evaluating the body has observable side effects
    pub has_side_effects: bool,
}

static TYPE_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s+type\s[^;'"]*?from\s*["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_STAR_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\bexport\s*\*\s*(?:as\s+([A-Za-z_$][\w$]*)\s*)?from\s*["']([^"']+)["'][ \t]*;?"#,
    )
    .unwrap()
});

static EXPORT_NAMED_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bexport\s*\{([^}]*)\}\s*from\s*["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bexport\s*\{([^}]*)\}[ \t]*;?"#).unwrap());

static EXPORT_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bexport\s+(async\s+function|function|class|const|let|var)\s+([A-Za-z_$][\w$]*)"#)
        .unwrap()
});

static EXPORT_DEFAULT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bexport\s+default\b"#).unwrap());

static STATIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*(?:([^'";()]+?)\s*from\s*)?["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static DYNAMIC_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap());

static REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap());

/// Code transformer
#[derive(Debug, Default)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform source code based on module type.
    pub fn transform(
        &self,
        source: &str,
        id: &str,
        options: &TransformOptions,
    ) -> Result<TransformedModule> {
        match options.module_type {
            ModuleType::JavaScript | ModuleType::Jsx => self.transform_js(source, id),
            ModuleType::TypeScript | ModuleType::Tsx => {
                debug!("stripping TypeScript: {}", id);
                let (mut imports, stripped) = collect_type_imports(source);
                let stripped = strip_types(&stripped);
                let mut result = self.transform_js(&stripped, id)?;
                imports.append(&mut result.imports);
                result.imports = imports;
                Ok(result)
            }
            ModuleType::Json => self.transform_json(source, id),
            ModuleType::Css => Ok(self.transform_css(source)),
            ModuleType::Asset => Ok(self.transform_asset()),
        }
    }

    /// Rewrite ESM syntax to the CommonJS shape the chunk runtime expects,
    /// collecting imports and exports along the way.
    fn transform_js(&self, source: &str, _id: &str) -> Result<TransformedModule> {
        // Records carry their match offset so the final lists come out in
        // source order even though the rewrite runs pattern by pattern.
        let mut imports: Vec<(usize, ImportRecord)> = Vec::new();
        let mut exports: Vec<(usize, String)> = Vec::new();
        let mut footer: Vec<String> = Vec::new();

        // `export { a, b as c } from "spec"`
        let code = EXPORT_NAMED_FROM_RE.replace_all(source, |caps: &Captures| {
            let pos = match_pos(caps);
            let specifier = caps[2].to_string();
            let items = parse_name_list(&caps[1]);
            imports.push((
                pos,
                ImportRecord {
                    specifier: specifier.clone(),
                    imported_names: items.iter().map(|(local, _)| local.clone()).collect(),
                    kind: ImportKind::Static,
                },
            ));
            let mut out = String::new();
            for (source_name, exported) in &items {
                exports.push((pos, exported.clone()));
                out.push_str(&format!(
                    "exports.{} = require(\"{}\").{}; ",
                    exported, specifier, source_name
                ));
            }
            out.trim_end().to_string()
        });

        // `export * from` / `export * as ns from`
        let code = EXPORT_STAR_FROM_RE.replace_all(&code, |caps: &Captures| {
            let pos = match_pos(caps);
            let specifier = caps[2].to_string();
            imports.push((
                pos,
                ImportRecord {
                    specifier: specifier.clone(),
                    imported_names: vec!["*".to_string()],
                    kind: ImportKind::Static,
                },
            ));
            match caps.get(1) {
                Some(ns) => {
                    exports.push((pos, ns.as_str().to_string()));
                    format!("exports.{} = require(\"{}\");", ns.as_str(), specifier)
                }
                None => {
                    exports.push((pos, "*".to_string()));
                    format!("Object.assign(exports, require(\"{}\"));", specifier)
                }
            }
        });

        // `export { a, b as c }`
        let code = EXPORT_LIST_RE.replace_all(&code, |caps: &Captures| {
            let pos = match_pos(caps);
            let items = parse_name_list(&caps[1]);
            let mut out = String::new();
            for (local, exported) in &items {
                exports.push((pos, exported.clone()));
                out.push_str(&format!("exports.{} = {}; ", exported, local));
            }
            out.trim_end().to_string()
        });

        // `export function f` / `export const x` / ...
        let code = EXPORT_DECL_RE.replace_all(&code, |caps: &Captures| {
            let name = caps[2].to_string();
            exports.push((match_pos(caps), name.clone()));
            footer.push(format!("exports.{} = {};", name, name));
            format!("{} {}", &caps[1], name)
        });

        // `export default <expr>`
        let code = EXPORT_DEFAULT_RE.replace_all(&code, |caps: &Captures| {
            exports.push((match_pos(caps), "default".to_string()));
            "exports.default =".to_string()
        });

        // Static imports
        let mut site = 0usize;
        let code = STATIC_IMPORT_RE.replace_all(&code, |caps: &Captures| {
            let specifier = caps[2].to_string();
            let clause = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let (default, namespace, named) = parse_import_clause(clause);

            let mut names = Vec::new();
            if default.is_some() {
                names.push("default".to_string());
            }
            if namespace.is_some() {
                names.push("*".to_string());
            }
            names.extend(named.iter().map(|(source_name, _)| source_name.clone()));
            imports.push((
                match_pos(caps),
                ImportRecord {
                    specifier: specifier.clone(),
                    imported_names: names,
                    kind: ImportKind::Static,
                },
            ));

            let rewritten = rewrite_import_site(&specifier, &default, &namespace, &named, site);
            site += 1;
            rewritten
        });

        // Dynamic imports become runtime chunk loads
        let code = DYNAMIC_IMPORT_RE.replace_all(&code, |caps: &Captures| {
            let specifier = caps[1].to_string();
            imports.push((
                match_pos(caps),
                ImportRecord {
                    specifier: specifier.clone(),
                    imported_names: Vec::new(),
                    kind: ImportKind::Dynamic,
                },
            ));
            format!("__rivet_import__(\"{}\")", specifier)
        });

        // Bare require() calls are already in target shape; record them
        for caps in REQUIRE_RE.captures_iter(&code) {
            let specifier = caps[1].to_string();
            if !imports.iter().any(|(_, i)| i.specifier == specifier) {
                imports.push((
                    match_pos(&caps),
                    ImportRecord {
                        specifier,
                        imported_names: Vec::new(),
                        kind: ImportKind::Static,
                    },
                ));
            }
        }

        let mut code = code.into_owned();
        if !footer.is_empty() {
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(&footer.join("\n"));
            code.push('\n');
        }

        imports.sort_by_key(|(pos, _)| *pos);
        exports.sort_by_key(|(pos, _)| *pos);

        Ok(TransformedModule {
            code,
            imports: imports.into_iter().map(|(_, i)| i).collect(),
            exports: exports.into_iter().map(|(_, e)| e).collect(),
            has_side_effects: true,
        })
    }

    /// Wrap JSON as a module exporting the parsed value
    fn transform_json(&self, source: &str, id: &str) -> Result<TransformedModule> {
        serde_json::from_str::<serde_json::Value>(source)
            .map_err(|e| Error::transform(id, format!("invalid JSON: {}", e)))?;

        Ok(TransformedModule {
            code: format!("module.exports = {};", source.trim()),
            imports: Vec::new(),
            exports: vec!["default".to_string()],
            has_side_effects: false,
        })
    }

    /// Wrap CSS as a module that injects a style tag
    fn transform_css(&self, source: &str) -> TransformedModule {
        let escaped = source
            .replace('\\', "\\\\")
            .replace('`', "\\`")
            .replace("${", "\\${");

        let code = format!(
            "var style = document.createElement('style');\n\
             style.textContent = `{}`;\n\
             document.head.appendChild(style);\n\
             module.exports = {{}};",
            escaped
        );

        TransformedModule {
            code,
            imports: Vec::new(),
            exports: Vec::new(),
            has_side_effects: true,
        }
    }

    /// Assets export their emitted URL; the emitter fills it in.
    fn transform_asset(&self) -> TransformedModule {
        TransformedModule {
            code: format!("module.exports = \"{}\";", ASSET_URL_PLACEHOLDER),
            imports: Vec::new(),
            exports: vec!["default".to_string()],
            has_side_effects: false,
        }
    }
}

/// Byte offset of a whole regex match.
fn match_pos(caps: &Captures) -> usize {
    caps.get(0).map(|m| m.start()).unwrap_or(0)
}

/// Record and remove `import type ... from "spec"` statements.
fn collect_type_imports(source: &str) -> (Vec<ImportRecord>, String) {
    let mut imports = Vec::new();
    let stripped = TYPE_IMPORT_RE.replace_all(source, |caps: &Captures| {
        imports.push(ImportRecord {
            specifier: caps[1].to_string(),
            imported_names: Vec::new(),
            kind: ImportKind::TypeOnly,
        });
        String::new()
    });
    (imports, stripped.into_owned())
}

/// Render one rewritten static import site.
fn rewrite_import_site(
    specifier: &str,
    default: &Option<String>,
    namespace: &Option<String>,
    named: &[(String, String)],
    site: usize,
) -> String {
    let require = format!("require(\"{}\")", specifier);
    let destructure = |named: &[(String, String)], from: &str| {
        let fields: Vec<String> = named
            .iter()
            .map(|(source_name, local)| {
                if source_name == local {
                    local.clone()
                } else {
                    format!("{}: {}", source_name, local)
                }
            })
            .collect();
        format!("const {{ {} }} = {};", fields.join(", "), from)
    };

    match (default, namespace, named.is_empty()) {
        (None, None, true) => format!("{};", require),
        (None, Some(ns), true) => format!("const {} = {};", ns, require),
        (None, None, false) => destructure(named, &require),
        (Some(d), None, true) => format!("const {} = __rivet_default({});", d, require),
        (Some(d), ns, _) => {
            let var = format!("__rivet_i{}", site);
            let mut out = format!("const {} = {}; ", var, require);
            out.push_str(&format!("const {} = __rivet_default({});", d, var));
            if let Some(ns) = ns {
                out.push_str(&format!(" const {} = {};", ns, var));
            }
            if !named.is_empty() {
                out.push(' ');
                out.push_str(&destructure(named, &var));
            }
            out
        }
        (None, Some(ns), false) => {
            let var = format!("__rivet_i{}", site);
            format!(
                "const {} = {}; const {} = {}; {}",
                var,
                require,
                ns,
                var,
                destructure(named, &var)
            )
        }
    }
}

/// Parse an import clause: `d`, `* as ns`, `{ a, b as c }`, or
/// combinations joined by commas.
fn parse_import_clause(
    clause: &str,
) -> (Option<String>, Option<String>, Vec<(String, String)>) {
    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();

    let mut rest = clause.trim();
    while !rest.is_empty() {
        if let Some(inner_start) = rest.strip_prefix('{') {
            let end = inner_start.find('}').unwrap_or(inner_start.len());
            named = parse_name_list(&inner_start[..end]);
            rest = inner_start[end..].trim_start_matches('}').trim();
        } else if let Some(after_star) = rest.strip_prefix('*') {
            let after_as = after_star.trim().trim_start_matches("as").trim();
            let ident: String = after_as
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            namespace = Some(ident.clone());
            rest = after_as[ident.len()..].trim();
        } else {
            let ident: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if ident.is_empty() {
                break;
            }
            rest = rest[ident.len()..].trim();
            default = Some(ident);
        }
        rest = rest.trim_start_matches(',').trim();
    }

    (default, namespace, named)
}

/// Parse `a, b as c` into (source name, local/exported name) pairs.
fn parse_name_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            match item.split_once(" as ") {
                Some((source_name, alias)) => {
                    Some((source_name.trim().to_string(), alias.trim().to_string()))
                }
                None => Some((item.to_string(), item.to_string())),
            }
        })
        .collect()
}

/// Strip TypeScript type syntax from source, preserving line structure so
/// sourcemap lines stay aligned. Handles annotations, interface blocks,
/// type aliases and `as` casts; expression-level TS (generics on calls,
/// non-null `!`) passes through untouched.
fn strip_types(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;
    let mut string_char = '"';
    let mut in_template = false;

    while let Some(c) = chars.next() {
        if !in_template && (c == '"' || c == '\'') {
            if !in_string {
                in_string = true;
                string_char = c;
            } else if string_char == c {
                in_string = false;
            }
            result.push(c);
            continue;
        }

        if c == '`' && !in_string {
            in_template = !in_template;
            result.push(c);
            continue;
        }

        if in_string || in_template {
            result.push(c);
            continue;
        }

        // Comments pass through untouched
        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    result.push(c);
                    for nc in chars.by_ref() {
                        result.push(nc);
                        if nc == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    result.push(c);
                    let mut prev = ' ';
                    for nc in chars.by_ref() {
                        result.push(nc);
                        if prev == '*' && nc == '/' {
                            break;
                        }
                        prev = nc;
                    }
                    continue;
                }
                _ => {}
            }
        }

        let at_word_boundary = !result
            .chars()
            .last()
            .map(|p| p.is_alphanumeric() || p == '_' || p == '$')
            .unwrap_or(false);

        // interface / export interface blocks
        if c == 'i' && at_word_boundary && peek_starts_with(&chars, "nterface ") {
            skip_interface_block(&mut chars, &mut result);
            continue;
        }
        if c == 'e' && at_word_boundary && peek_starts_with(&chars, "xport interface ") {
            for _ in 0.."xport ".len() {
                chars.next();
            }
            chars.next(); // 'i'
            skip_interface_block(&mut chars, &mut result);
            continue;
        }

        // type / export type aliases
        if c == 't' && at_word_boundary && peek_starts_with(&chars, "ype ") && alias_follows(&chars)
        {
            skip_to_statement_end(&mut chars, &mut result);
            continue;
        }
        if c == 'e' && at_word_boundary && peek_starts_with(&chars, "xport type ") {
            skip_to_statement_end(&mut chars, &mut result);
            continue;
        }

        // `: Type` annotations
        if c == ':' {
            let rest: String = chars.clone().take(50).collect();
            if rest.starts_with(' ') && looks_like_type(rest.trim_start()) {
                skip_annotation(&mut chars);
                if matches!(chars.peek(), Some('=') | Some('{')) {
                    result.push(' ');
                }
                continue;
            }
        }

        // ` as Type` casts
        if c == ' ' && peek_starts_with(&chars, "as ") {
            let mut lookahead = chars.clone();
            for _ in 0..3 {
                lookahead.next();
            }
            let rest: String = lookahead.clone().take(50).collect();
            if looks_like_type(&rest) {
                for _ in 0..3 {
                    chars.next();
                }
                skip_cast_type(&mut chars);
                result.push(' ');
                continue;
            }
        }

        result.push(c);
    }

    result
}

fn peek_starts_with(chars: &std::iter::Peekable<std::str::Chars>, prefix: &str) -> bool {
    let ahead: String = chars.clone().take(prefix.len()).collect();
    ahead == prefix
}

/// After `type `, an alias declaration has `Name =` or `Name<...> =`.
fn alias_follows(chars: &std::iter::Peekable<std::str::Chars>) -> bool {
    let ahead: String = chars.clone().take(80).collect();
    let after_kw = ahead.trim_start_matches("ype ").trim_start();
    let name_len = after_kw
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .count();
    if name_len == 0 {
        return false;
    }
    let tail = after_kw[name_len..].trim_start();
    tail.starts_with('=') || tail.starts_with('<')
}

/// Skip an interface body, keeping its newlines so line numbers hold.
fn skip_interface_block(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    result: &mut String,
) {
    let mut newlines = 0usize;
    for nc in chars.by_ref() {
        if nc == '\n' {
            newlines += 1;
        }
        if nc == '{' {
            let mut depth = 1;
            for bc in chars.by_ref() {
                if bc == '\n' {
                    newlines += 1;
                } else if bc == '{' {
                    depth += 1;
                } else if bc == '}' {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            break;
        }
    }
    result.push_str(&"\n".repeat(newlines));
}

/// Skip to the end of a single-line statement, keeping the newline.
fn skip_to_statement_end(chars: &mut std::iter::Peekable<std::str::Chars>, result: &mut String) {
    for nc in chars.by_ref() {
        if nc == ';' {
            break;
        }
        if nc == '\n' {
            result.push('\n');
            break;
        }
    }
}

fn looks_like_type(trimmed: &str) -> bool {
    const KEYWORDS: [&str; 10] = [
        "string",
        "number",
        "boolean",
        "any",
        "void",
        "never",
        "unknown",
        "null",
        "undefined",
        "object",
    ];
    KEYWORDS.iter().any(|k| {
        trimmed.starts_with(k)
            && !trimmed[k.len()..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false)
    }) || trimmed
        .chars()
        .next()
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
}

/// Skip an annotation until a top-level `=`, `)`, `,`, `{`, `;` or newline.
fn skip_annotation(chars: &mut std::iter::Peekable<std::str::Chars>) {
    let mut depth = 0i32;
    while let Some(&next) = chars.peek() {
        match next {
            '<' | '(' | '[' => {
                depth += 1;
                chars.next();
            }
            '>' | ']' => {
                depth -= 1;
                chars.next();
            }
            ')' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                chars.next();
            }
            '=' | ',' | '{' | ';' | '\n' if depth <= 0 => break,
            _ => {
                chars.next();
            }
        }
    }
}

/// Skip the type name of an `as` cast.
fn skip_cast_type(chars: &mut std::iter::Peekable<std::str::Chars>) {
    let mut depth = 0i32;
    while let Some(&next) = chars.peek() {
        match next {
            '<' | '(' => {
                depth += 1;
                chars.next();
            }
            '>' => {
                depth -= 1;
                chars.next();
            }
            ')' | ',' | ';' | '}' if depth <= 0 => break,
            c if c.is_whitespace() && depth <= 0 => break,
            _ => {
                chars.next();
            }
        }
    }
}
