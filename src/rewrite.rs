use std::collections::HashSet;
use std::path::Path;

use swc_core::{
    common::{BytePos, Globals, Span, Spanned, GLOBALS},
    ecma::{
        ast::*,
        parser::{error::Error as ParseError, EsSyntax, Parser, StringInput, Syntax},
        visit::{Visit, VisitWith},
    },
};

use crate::error::RewriteError;
use crate::ledger::{Ledger, TextRange};
use crate::module_id::{is_relative, Resolver};
use crate::options::Policy;
use crate::scope::{DependencyRecord, ScopeTracker};

/// Position of the first source byte; `BytePos(0)` is reserved for dummy spans.
const START_POS: BytePos = BytePos(1);

/// Dependency names provided by the loader itself, in canonical order.
const CAPABILITIES: [&str; 3] = ["require", "exports", "module"];

// -----------------------------------------------------------------------------
// Entry
// -----------------------------------------------------------------------------

/// Rewrite the AMD calls of one file. `path` must be absolute.
pub fn rewrite(policy: &Policy, path: &Path, source: &str) -> Result<String, RewriteError> {
    let script = parse(source)?;
    let mut rewriter = Rewriter::new(policy, path, source);
    script.visit_with(&mut rewriter);
    rewriter.finish()
}

fn parse(source: &str) -> Result<Script, RewriteError> {
    let end = u32::try_from(source.len())
        .ok()
        .and_then(|len| len.checked_add(START_POS.0))
        .ok_or(RewriteError::SourceTooLarge { len: source.len() })?;

    GLOBALS.set(&Globals::new(), || {
        let input = StringInput::new(source, START_POS, BytePos(end));
        let mut parser = Parser::new(Syntax::Es(EsSyntax::default()), input, None);
        let script = parser.parse_script().map_err(|e| parse_error(&e))?;
        if let Some(e) = parser.take_errors().first() {
            return Err(parse_error(e));
        }
        Ok(script)
    })
}

fn parse_error(err: &ParseError) -> RewriteError {
    RewriteError::Parse {
        offset: err.span().lo().0.saturating_sub(START_POS.0) as usize,
        message: err.kind().msg().into_owned(),
    }
}

// -----------------------------------------------------------------------------
// Node classification
// -----------------------------------------------------------------------------

pub(crate) enum CallShape<'a> {
    /// `require(['./a', './b'], cb)`
    DynamicRequire(&'a ArrayLit),
    /// `require('./a')`
    LiteralRequire(&'a Str),
    /// `define(...)`
    Declaration,
    Other,
}

fn callee_name(call: &CallExpr) -> Option<&str> {
    match &call.callee {
        Callee::Expr(expr) => match &**expr {
            Expr::Ident(id) => Some(id.sym.as_ref()),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn classify(call: &CallExpr) -> CallShape<'_> {
    match callee_name(call) {
        Some("define") => CallShape::Declaration,
        Some("require") => match call.args.first() {
            Some(ExprOrSpread { spread: None, expr }) => match &**expr {
                Expr::Array(array) => CallShape::DynamicRequire(array),
                Expr::Lit(Lit::Str(s)) => CallShape::LiteralRequire(s),
                _ => CallShape::Other,
            },
            _ => CallShape::Other,
        },
        _ => CallShape::Other,
    }
}

/// Arguments of a `define` call with the optional slots resolved.
struct Declaration<'a> {
    id: Option<&'a Str>,
    /// First argument after the id slot.
    first: &'a Expr,
    deps: Option<&'a ArrayLit>,
    factory: Option<&'a Expr>,
}

impl<'a> Declaration<'a> {
    fn from_call(call: &'a CallExpr) -> Result<Self, &'static str> {
        if call.args.iter().any(|a| a.spread.is_some()) {
            return Err("spread arguments");
        }
        let mut args = call.args.iter().map(|a| &*a.expr);
        let first = args.next().ok_or("no arguments")?;
        let (id, first) = match first {
            Expr::Lit(Lit::Str(s)) => (Some(s), args.next().ok_or("module id without a factory")?),
            Expr::Lit(_) => return Err("module id is not a string"),
            other => (None, other),
        };
        let (deps, factory) = match first {
            Expr::Array(array) => (Some(array), args.next()),
            other => (None, Some(other)),
        };
        Ok(Self {
            id,
            first,
            deps,
            factory,
        })
    }
}

fn pat_name(pat: &Pat) -> Option<&str> {
    match pat {
        Pat::Ident(b) => Some(b.id.sym.as_ref()),
        _ => None,
    }
}

fn factory_param_names(factory: Option<&Expr>) -> Vec<&str> {
    match factory {
        Some(Expr::Fn(f)) => f.function.params.iter().filter_map(|p| pat_name(&p.pat)).collect(),
        Some(Expr::Arrow(a)) => a.params.iter().filter_map(pat_name).collect(),
        _ => vec![],
    }
}

fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Values of `claimed` not yet in `seen`, first occurrence wins.
fn unclaimed<'d>(claimed: &'d [DependencyRecord], seen: &mut HashSet<String>) -> Vec<&'d str> {
    claimed
        .iter()
        .filter(|d| seen.insert(d.value.clone()))
        .map(|d| d.value.as_str())
        .collect()
}

// -----------------------------------------------------------------------------
// Rewriter
// -----------------------------------------------------------------------------

/// One-file walk state. Calls are handled after their children, so inner
/// `require`s and nested `define`s are always seen before their enclosing
/// `define` is finalized.
pub struct Rewriter<'a> {
    policy: &'a Policy,
    resolver: Resolver<'a>,
    source: &'a str,
    ledger: Ledger,
    scope: ScopeTracker,
    error: Option<RewriteError>,
}

impl<'a> Rewriter<'a> {
    pub fn new(policy: &'a Policy, path: &'a Path, source: &'a str) -> Self {
        Self {
            policy,
            resolver: Resolver::new(policy, path),
            source,
            ledger: Ledger::default(),
            scope: ScopeTracker::default(),
            error: None,
        }
    }

    pub fn finish(self) -> Result<String, RewriteError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.ledger.apply(self.source)
    }

    // ---------- positions ----------

    fn offset(&self, pos: BytePos) -> usize {
        pos.0.saturating_sub(START_POS.0) as usize
    }

    fn range(&self, span: Span) -> TextRange {
        TextRange::new(self.offset(span.lo()), self.offset(span.hi()))
    }

    fn start_of<N: Spanned>(&self, node: &N) -> usize {
        self.offset(node.span().lo())
    }

    fn end_of<N: Spanned>(&self, node: &N) -> usize {
        self.offset(node.span().hi())
    }

    /// Whether an arrow's parameter list starting at `param` is parenthesized.
    fn arrow_has_parens(&self, arrow: &ArrowExpr, param: usize) -> bool {
        let start = self.start_of(&arrow.span);
        self.source
            .get(start..param)
            .is_some_and(|head| head.contains('('))
    }

    fn replace_literal(&mut self, node: &Str, value: &str) {
        if &*node.value == value {
            return;
        }
        let range = self.range(node.span);
        self.ledger.replace(range, quote(value));
    }

    // ---------- dispatch ----------

    fn handle_call(&mut self, call: &CallExpr) -> Result<(), RewriteError> {
        match classify(call) {
            CallShape::DynamicRequire(array) => {
                self.rewrite_require_array(array);
                Ok(())
            }
            CallShape::LiteralRequire(s) => {
                self.rewrite_require_literal(s);
                Ok(())
            }
            CallShape::Declaration => self.rewrite_declaration(call),
            CallShape::Other => Ok(()),
        }
    }

    fn rewrite_require_array(&mut self, array: &ArrayLit) {
        for elem in array.elems.iter().flatten() {
            if let Expr::Lit(Lit::Str(s)) = &*elem.expr {
                if is_relative(&s.value) {
                    let id = self.resolver.resolve(&s.value);
                    self.replace_literal(s, &id);
                }
            }
        }
    }

    fn rewrite_require_literal(&mut self, s: &Str) {
        let range = self.range(s.span);
        if is_relative(&s.value) {
            let id = self.resolver.resolve(&s.value);
            self.replace_literal(s, &id);
            self.scope.push_dependency(range, id);
        } else {
            self.scope.push_dependency(range, s.value.to_string());
        }
    }

    // ---------- define ----------

    fn rewrite_declaration(&mut self, call: &CallExpr) -> Result<(), RewriteError> {
        let range = self.range(call.span);

        // A define nested in this one is not a module boundary of its own.
        for nested in self.scope.take_nested(range) {
            self.ledger.cancel(nested.replacements);
        }
        let claimed = self.scope.claim_dependencies(range);

        let decl = Declaration::from_call(call).map_err(|reason| {
            RewriteError::MalformedDeclaration {
                offset: range.start,
                reason,
            }
        })?;

        let first_edit = self.ledger.len();
        self.rewrite_module_id(&decl);
        match decl.deps {
            Some(array) if array.elems.iter().any(Option::is_some) => {
                self.rewrite_dependency_array(&decl, array, &claimed)
            }
            _ => self.insert_dependency_array(&decl, &claimed),
        }
        self.scope
            .push_declaration(range, first_edit..self.ledger.len());
        Ok(())
    }

    fn rewrite_module_id(&mut self, decl: &Declaration) {
        let file = self.resolver.file();
        let remove = self.policy.remove_identifier.applies_to(file);
        let next = self.start_of(decl.first);

        let Some(id) = decl.id else {
            if !remove {
                let own = self.resolver.own_id();
                self.ledger.insert(next, format!("{}, ", quote(&own)));
            }
            return;
        };
        if remove {
            let start = self.start_of(id);
            self.ledger.remove(TextRange::new(start, next));
            return;
        }
        // Only ids that already name this file are canonicalized.
        let stem = file.file_stem().and_then(|s| s.to_str());
        if id.value.rsplit('/').next() == stem {
            let own = self.resolver.own_id();
            self.replace_literal(id, &own);
        }
    }

    fn rewrite_dependency_array(
        &mut self,
        decl: &Declaration,
        array: &ArrayLit,
        claimed: &[DependencyRecord],
    ) {
        let elems: Vec<&Expr> = array.elems.iter().flatten().map(|e| &*e.expr).collect();
        let mut seen = HashSet::new();
        let mut has_require = false;

        for elem in &elems {
            let Expr::Lit(Lit::Str(s)) = elem else {
                continue;
            };
            let reference: &str = &s.value;
            if CAPABILITIES.contains(&reference) {
                has_require |= reference == "require";
                seen.insert(reference.to_string());
                continue;
            }
            let id = self.resolver.resolve(reference);
            self.replace_literal(s, &id);
            seen.insert(id);
        }

        let (Some(first), Some(last)) = (elems.first(), elems.last()) else {
            return;
        };
        if !has_require {
            self.ledger.insert(self.start_of(*first), "\"require\", ");
            if let Some(factory) = decl.factory {
                self.prepend_require_param(factory);
            }
        }

        let appended: String = unclaimed(claimed, &mut seen)
            .into_iter()
            .map(|v| format!(", {}", quote(v)))
            .collect();
        if !appended.is_empty() {
            self.ledger.insert(self.end_of(*last), appended);
        }
    }

    fn insert_dependency_array(&mut self, decl: &Declaration, claimed: &[DependencyRecord]) {
        let at = match decl.deps {
            Some(array) => {
                let range = self.range(array.span);
                match decl.factory {
                    Some(factory) => {
                        let end = self.start_of(factory);
                        self.ledger.remove(TextRange::new(range.start, end));
                    }
                    None => self.ledger.remove(range),
                }
                range.start
            }
            None => self.start_of(decl.first),
        };

        let params = factory_param_names(decl.factory);
        let has_require = params.contains(&"require");
        let mut deps: Vec<String> = CAPABILITIES
            .iter()
            .filter(|c| **c == "require" || params.contains(*c))
            .map(|c| c.to_string())
            .collect();

        let mut seen: HashSet<String> = deps.iter().cloned().collect();
        let hoisted: Vec<String> = unclaimed(claimed, &mut seen)
            .into_iter()
            .map(str::to_string)
            .collect();
        deps.extend(hoisted);

        // The array goes in before any edit to the factory head, which may
        // start at the same offset.
        self.ledger
            .insert(at, format!("{}, ", serde_json::Value::from(deps)));
        if !has_require {
            if let Some(factory) = decl.factory {
                self.prepend_require_param(factory);
            }
        }
    }

    /// Give the factory a leading `require` parameter.
    fn prepend_require_param(&mut self, factory: &Expr) {
        match factory {
            Expr::Fn(f) => {
                let function = &f.function;
                if let Some(param) = function.params.first() {
                    self.ledger.insert(self.start_of(&param.span), "require, ");
                    return;
                }
                let Some(body) = &function.body else {
                    return;
                };
                let body_start = self.start_of(&body.span);
                match &f.ident {
                    Some(ident) => {
                        let name_end = self.end_of(&ident.span);
                        self.ledger
                            .replace(TextRange::new(name_end, body_start), " (require) ");
                    }
                    None => {
                        let header = format!(
                            "{}function{} (require) ",
                            if function.is_async { "async " } else { "" },
                            if function.is_generator { "*" } else { "" },
                        );
                        let start = self.start_of(&function.span);
                        self.ledger.replace(TextRange::new(start, body_start), header);
                    }
                }
            }
            Expr::Arrow(arrow) => {
                if let Some(param) = arrow.params.first() {
                    let range = self.range(param.span());
                    if self.arrow_has_parens(arrow, range.start) {
                        self.ledger.insert(range.start, "require, ");
                    } else {
                        // `x => ...`
                        self.ledger.insert(range.start, "(require, ");
                        self.ledger.insert(range.end, ")");
                    }
                    return;
                }
                let header = format!(
                    "{}function (require) ",
                    if arrow.is_async { "async " } else { "" }
                );
                let start = self.start_of(&arrow.span);
                match &*arrow.body {
                    BlockStmtOrExpr::BlockStmt(body) => {
                        let body_start = self.start_of(&body.span);
                        self.ledger.replace(TextRange::new(start, body_start), header);
                    }
                    BlockStmtOrExpr::Expr(expr) => {
                        let body = self.range(expr.span());
                        self.ledger
                            .replace(TextRange::new(start, body.start), format!("{header}{{ return "));
                        self.ledger.insert(body.end, " }");
                    }
                }
            }
            _ => {}
        }
    }
}

impl Visit for Rewriter<'_> {
    fn visit_call_expr(&mut self, n: &CallExpr) {
        n.visit_children_with(self);
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.handle_call(n) {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Alias, RemoveIdentifier};
    use std::path::PathBuf;

    const BASE: &str = "/path/to/repo";
    const PREFIX: &str = "@my-module";

    fn policy() -> Policy {
        Policy::new(BASE, PREFIX)
    }

    fn run(policy: &Policy, source: &str) -> String {
        let path = PathBuf::from(format!("{BASE}/foo.js"));
        rewrite(policy, &path, source).expect("rewrite")
    }

    #[test]
    fn emits_module_id() {
        let out = run(&policy(), "define(function () {});");
        assert_eq!(out, r#"define("@my-module/foo", ["require"], function (require) {});"#);
    }

    #[test]
    fn suppressed_module_id_is_not_emitted() {
        let mut policy = policy();
        policy.remove_identifier = RemoveIdentifier::Always;
        let out = run(&policy, "define(function () {});");
        assert_eq!(out, r#"define(["require"], function (require) {});"#);
    }

    #[test]
    fn existing_module_id_is_removed() {
        let mut policy = policy();
        policy.remove_identifier = RemoveIdentifier::Always;
        let out = run(&policy, "define('foo', [], function () {});");
        assert_eq!(out, r#"define(["require"], function (require) {});"#);
    }

    #[test]
    fn literal_requires_are_hoisted_once() {
        let src = "define(function () {
    var bar = require('./bar.js');
    var bar2 = require('./bar.js');
    var baz = require('./baz.js');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar","@my-module/baz"], function (require) {
    var bar = require("@my-module/bar");
    var bar2 = require("@my-module/bar");
    var baz = require("@my-module/baz");
});"#
        );
    }

    #[test]
    fn require_arrays_are_rewritten_in_place() {
        let src = "define(function () {
    var bar = require('./bar.js');
});
require(['./foo.js', 'jquery']);";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar"], function (require) {
    var bar = require("@my-module/bar");
});
require(["@my-module/foo", 'jquery']);"#
        );
    }

    #[test]
    fn empty_dependency_array_is_rebuilt() {
        let src = "define([], function () {
    var bar = require('./bar.js');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar"], function (require) {
    var bar = require("@my-module/bar");
});"#
        );
    }

    #[test]
    fn alias_takes_precedence() {
        let mut policy = policy();
        policy.aliases.push(Alias {
            identifier: "@alias/foo".into(),
            path: PathBuf::from(format!("{BASE}/bar.js")),
            applies_prefix: false,
        });
        let src = "define([], function () {
    var bar = require('./bar.js');
});";
        let out = run(&policy, src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@alias/foo"], function (require) {
    var bar = require("@alias/foo");
});"#
        );
    }

    #[test]
    fn capabilities_come_from_params() {
        let src = "define(function (module) {
    module.exports = {};
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","module"], function (require, module) {
    module.exports = {};
});"#
        );
    }

    #[test]
    fn capabilities_use_canonical_order() {
        let src = "define(function (module, exports, require) {});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","exports","module"], function (module, exports, require) {});"#
        );
    }

    #[test]
    fn require_is_prepended_to_declared_dependencies() {
        let src = "define(['./bar.js', './baz.js'], function (bar, baz) {
    var bar2 = require('./bar.js');
    var log = require('./log.js');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require", "@my-module/bar", "@my-module/baz", "@my-module/log"], function (require, bar, baz) {
    var bar2 = require("@my-module/bar");
    var log = require("@my-module/log");
});"#
        );
    }

    #[test]
    fn declared_dependencies_with_empty_factory_params() {
        let src = "define(['./bar'], function () {});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require", "@my-module/bar"], function (require) {});"#
        );
    }

    #[test]
    fn bare_dependencies_are_kept() {
        let src = "define(['jquery'], function ($) {
    var _ = require('lodash');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require", 'jquery', "lodash"], function (require, $) {
    var _ = require('lodash');
});"#
        );
    }

    #[test]
    fn inner_define_is_left_alone() {
        let src = "define(function () {
    var bar = require('./bar.js');
    define(function () {
        var baz = require('./baz.js');
    });
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar"], function (require) {
    var bar = require("@my-module/bar");
    define(function () {
        var baz = require("@my-module/baz");
    });
});"#
        );
    }

    #[test]
    fn named_function_keeps_its_name() {
        let src = "define(function foo () {
    var bar = require('./bar.js');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar"], function foo (require) {
    var bar = require("@my-module/bar");
});"#
        );
    }

    #[test]
    fn arrow_factory_becomes_function() {
        let src = "define(() => {
    var bar = require('./bar.js');
});";
        let out = run(&policy(), src);
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","@my-module/bar"], function (require) {
    var bar = require("@my-module/bar");
});"#
        );
    }

    #[test]
    fn expression_bodied_arrow_gets_a_block() {
        let out = run(&policy(), "define(() => ({}));");
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require"], function (require) { return ({}) });"#
        );
    }

    #[test]
    fn bare_arrow_param_is_parenthesized() {
        let out = run(&policy(), "define(module => { module.exports = 1; });");
        assert_eq!(
            out,
            r#"define("@my-module/foo", ["require","module"], (require, module) => { module.exports = 1; });"#
        );
    }

    #[test]
    fn object_factory_gets_dependency_array_only() {
        let out = run(&policy(), "define({ a: 1 });");
        assert_eq!(out, r#"define("@my-module/foo", ["require"], { a: 1 });"#);
    }

    #[test]
    fn literal_id_naming_the_file_is_canonicalized() {
        let out = run(&policy(), "define('pkg/foo', ['require'], function (require) {});");
        assert_eq!(
            out,
            r#"define("@my-module/foo", ['require'], function (require) {});"#
        );
    }

    #[test]
    fn unrelated_literal_id_is_kept() {
        let src = "define('other', ['require'], function (require) {});";
        assert_eq!(run(&policy(), src), src);
    }

    #[test]
    fn canonical_input_is_unchanged() {
        let src = r#"define("@my-module/foo", ["require", "@my-module/bar"], function (require) {
    var bar = require("@my-module/bar");
});"#;
        assert_eq!(run(&policy(), src), src);
    }

    #[test]
    fn output_is_deterministic() {
        let src = "define(function () { require('./a'); require('./b'); require('./a'); });";
        let policy = policy();
        assert_eq!(run(&policy, src), run(&policy, src));
    }

    #[test]
    fn code_outside_declarations_is_untouched() {
        let src = "var x = require('./bar'); console.log(x);";
        assert_eq!(
            run(&policy(), src),
            r#"var x = require("@my-module/bar"); console.log(x);"#
        );
    }

    #[test]
    fn parse_failure_is_reported() {
        let err = rewrite(&policy(), Path::new("/path/to/repo/foo.js"), "define(function () {")
            .unwrap_err();
        assert!(matches!(err, RewriteError::Parse { .. }));
    }

    #[test]
    fn define_without_arguments_is_rejected() {
        let err = rewrite(&policy(), Path::new("/path/to/repo/foo.js"), "define();").unwrap_err();
        assert!(matches!(
            err,
            RewriteError::MalformedDeclaration { offset: 0, reason: "no arguments" }
        ));
    }

    #[test]
    fn define_with_only_an_id_is_rejected() {
        let err =
            rewrite(&policy(), Path::new("/path/to/repo/foo.js"), "define('foo');").unwrap_err();
        assert!(matches!(err, RewriteError::MalformedDeclaration { .. }));
    }

    #[test]
    fn classification() {
        let src = "require(['./a']); require('./b'); define(function () {}); foo();";
        let script = parse(src).expect("parse");
        let mut shapes = vec![];
        struct Collect<'s>(&'s mut Vec<&'static str>);
        impl Visit for Collect<'_> {
            fn visit_call_expr(&mut self, n: &CallExpr) {
                self.0.push(match classify(n) {
                    CallShape::DynamicRequire(_) => "dynamic",
                    CallShape::LiteralRequire(_) => "literal",
                    CallShape::Declaration => "define",
                    CallShape::Other => "other",
                });
                n.visit_children_with(self);
            }
        }
        script.visit_with(&mut Collect(&mut shapes));
        assert_eq!(shapes, ["dynamic", "literal", "define", "other"]);
    }
}
