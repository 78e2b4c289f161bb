//! Compile-time rules the parser leaves to the compiler.
//!
//! The parser accepts any expression on the left of `=`, `del` or `+=`, and
//! any `return`, `yield`, `await`, `break`, `continue` or `nonlocal` position.
//! Python's compiler rejects most of those; this walk rejects them the same
//! way so malformed code never reaches the linter.

use rustpython_parser::ast::{Arguments, Comprehension, ExceptHandler, Expr, Stmt, WithItem};

type Verdict = Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Sync,
    Async,
}

/// What the code being walked is nested in.
#[derive(Debug, Clone, Copy, Default)]
struct Scope {
    /// Innermost function whose body this is; class bodies clear it.
    function: Option<FunctionKind>,
    /// Some function encloses this code, possibly through class bodies.
    inside_function: bool,
    in_loop: bool,
    in_comprehension: bool,
}

impl Scope {
    fn function_body(self, kind: FunctionKind) -> Self {
        Self {
            function: Some(kind),
            inside_function: true,
            in_loop: false,
            in_comprehension: false,
        }
    }

    fn class_body(self) -> Self {
        Self {
            function: None,
            inside_function: self.inside_function,
            in_loop: false,
            in_comprehension: false,
        }
    }

    fn loop_body(self) -> Self {
        Self {
            in_loop: true,
            ..self
        }
    }

    fn comprehension(self) -> Self {
        Self {
            in_comprehension: true,
            ..self
        }
    }

    fn is_async(self) -> bool {
        self.function == Some(FunctionKind::Async)
    }
}

/// Where a target expression appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Store,
    Delete,
    Augmented,
    Annotated,
}

impl Target {
    fn invalid(self, what: &str) -> String {
        match self {
            Target::Store => format!("cannot assign to {what}"),
            Target::Delete => format!("cannot delete {what}"),
            Target::Augmented => {
                format!("'{what}' is an illegal expression for augmented assignment")
            }
            Target::Annotated => format!("illegal target for annotation: {what}"),
        }
    }
}

/// Check a parsed module body. The error is a compiler-style message.
pub(crate) fn check_module(body: &[Stmt]) -> Verdict {
    walk_body(body, Scope::default())
}

fn walk_body(body: &[Stmt], scope: Scope) -> Verdict {
    body.iter().try_for_each(|stmt| walk_stmt(stmt, scope))
}

fn walk_exprs(exprs: &[Expr], scope: Scope) -> Verdict {
    exprs.iter().try_for_each(|expr| walk_expr(expr, scope))
}

fn walk_opt_expr(expr: Option<&Expr>, scope: Scope) -> Verdict {
    expr.map_or(Ok(()), |expr| walk_expr(expr, scope))
}

fn walk_stmt(stmt: &Stmt, scope: Scope) -> Verdict {
    match stmt {
        Stmt::FunctionDef(node) => {
            walk_signature(&node.args, &node.decorator_list, node.returns.as_deref(), scope)?;
            walk_body(&node.body, scope.function_body(FunctionKind::Sync))
        }
        Stmt::AsyncFunctionDef(node) => {
            walk_signature(&node.args, &node.decorator_list, node.returns.as_deref(), scope)?;
            walk_body(&node.body, scope.function_body(FunctionKind::Async))
        }
        Stmt::ClassDef(node) => {
            walk_exprs(&node.decorator_list, scope)?;
            walk_exprs(&node.bases, scope)?;
            node.keywords
                .iter()
                .try_for_each(|keyword| walk_expr(&keyword.value, scope))?;
            walk_body(&node.body, scope.class_body())
        }
        Stmt::Return(node) => {
            if scope.function.is_none() {
                return Err("'return' outside function".to_string());
            }
            walk_opt_expr(node.value.as_deref(), scope)
        }
        Stmt::Delete(node) => node
            .targets
            .iter()
            .try_for_each(|target| check_target(target, Target::Delete, scope)),
        Stmt::Assign(node) => {
            node.targets
                .iter()
                .try_for_each(|target| check_target(target, Target::Store, scope))?;
            walk_expr(&node.value, scope)
        }
        Stmt::TypeAlias(node) => {
            walk_expr(&node.name, scope)?;
            walk_expr(&node.value, scope)
        }
        Stmt::AugAssign(node) => {
            check_target(&node.target, Target::Augmented, scope)?;
            walk_expr(&node.value, scope)
        }
        Stmt::AnnAssign(node) => {
            check_target(&node.target, Target::Annotated, scope)?;
            walk_expr(&node.annotation, scope)?;
            walk_opt_expr(node.value.as_deref(), scope)
        }
        Stmt::For(node) => walk_for(&node.target, &node.iter, &node.body, &node.orelse, scope),
        Stmt::AsyncFor(node) => {
            require_async(scope, "async for")?;
            walk_for(&node.target, &node.iter, &node.body, &node.orelse, scope)
        }
        Stmt::While(node) => {
            walk_expr(&node.test, scope)?;
            walk_body(&node.body, scope.loop_body())?;
            walk_body(&node.orelse, scope)
        }
        Stmt::If(node) => {
            walk_expr(&node.test, scope)?;
            walk_body(&node.body, scope)?;
            walk_body(&node.orelse, scope)
        }
        Stmt::With(node) => {
            walk_with_items(&node.items, scope)?;
            walk_body(&node.body, scope)
        }
        Stmt::AsyncWith(node) => {
            require_async(scope, "async with")?;
            walk_with_items(&node.items, scope)?;
            walk_body(&node.body, scope)
        }
        Stmt::Match(node) => {
            walk_expr(&node.subject, scope)?;
            node.cases.iter().try_for_each(|case| {
                walk_opt_expr(case.guard.as_deref(), scope)?;
                walk_body(&case.body, scope)
            })
        }
        Stmt::Raise(node) => {
            walk_opt_expr(node.exc.as_deref(), scope)?;
            walk_opt_expr(node.cause.as_deref(), scope)
        }
        Stmt::Try(node) => {
            walk_body(&node.body, scope)?;
            walk_handlers(&node.handlers, scope)?;
            walk_body(&node.orelse, scope)?;
            walk_body(&node.finalbody, scope)
        }
        Stmt::TryStar(node) => {
            walk_body(&node.body, scope)?;
            walk_handlers(&node.handlers, scope)?;
            walk_body(&node.orelse, scope)?;
            walk_body(&node.finalbody, scope)
        }
        Stmt::Assert(node) => {
            walk_expr(&node.test, scope)?;
            walk_opt_expr(node.msg.as_deref(), scope)
        }
        Stmt::Expr(node) => walk_expr(&node.value, scope),
        Stmt::Nonlocal(_) if !scope.inside_function => {
            Err("nonlocal declaration not allowed at module level".to_string())
        }
        Stmt::Break(_) if !scope.in_loop => Err("'break' outside loop".to_string()),
        Stmt::Continue(_) if !scope.in_loop => {
            Err("'continue' not properly in loop".to_string())
        }
        Stmt::Import(_)
        | Stmt::ImportFrom(_)
        | Stmt::Global(_)
        | Stmt::Nonlocal(_)
        | Stmt::Pass(_)
        | Stmt::Break(_)
        | Stmt::Continue(_) => Ok(()),
    }
}

fn walk_expr(expr: &Expr, scope: Scope) -> Verdict {
    match expr {
        Expr::BoolOp(node) => walk_exprs(&node.values, scope),
        Expr::NamedExpr(node) => {
            if !matches!(*node.target, Expr::Name(_)) {
                return Err(format!(
                    "cannot use assignment expressions with {}",
                    describe(&node.target)
                ));
            }
            walk_expr(&node.value, scope)
        }
        Expr::BinOp(node) => {
            walk_expr(&node.left, scope)?;
            walk_expr(&node.right, scope)
        }
        Expr::UnaryOp(node) => walk_expr(&node.operand, scope),
        Expr::Lambda(node) => {
            walk_arguments(&node.args, scope)?;
            walk_expr(&node.body, scope.function_body(FunctionKind::Sync))
        }
        Expr::IfExp(node) => {
            walk_expr(&node.test, scope)?;
            walk_expr(&node.body, scope)?;
            walk_expr(&node.orelse, scope)
        }
        Expr::Dict(node) => {
            node.keys
                .iter()
                .try_for_each(|key| walk_opt_expr(key.as_ref(), scope))?;
            walk_exprs(&node.values, scope)
        }
        Expr::Set(node) => walk_exprs(&node.elts, scope),
        Expr::ListComp(node) => walk_comprehension(&[&*node.elt], &node.generators, scope),
        Expr::SetComp(node) => walk_comprehension(&[&*node.elt], &node.generators, scope),
        Expr::DictComp(node) => {
            walk_comprehension(&[&*node.key, &*node.value], &node.generators, scope)
        }
        Expr::GeneratorExp(node) => walk_comprehension(&[&*node.elt], &node.generators, scope),
        Expr::Await(node) => {
            require_async(scope, "await")?;
            walk_expr(&node.value, scope)
        }
        Expr::Yield(node) => {
            check_yield(scope, "yield")?;
            walk_opt_expr(node.value.as_deref(), scope)
        }
        Expr::YieldFrom(node) => {
            check_yield(scope, "yield from")?;
            if scope.is_async() {
                return Err("'yield from' inside async function".to_string());
            }
            walk_expr(&node.value, scope)
        }
        Expr::Compare(node) => {
            walk_expr(&node.left, scope)?;
            walk_exprs(&node.comparators, scope)
        }
        Expr::Call(node) => {
            walk_expr(&node.func, scope)?;
            walk_exprs(&node.args, scope)?;
            node.keywords
                .iter()
                .try_for_each(|keyword| walk_expr(&keyword.value, scope))
        }
        Expr::FormattedValue(node) => {
            walk_expr(&node.value, scope)?;
            walk_opt_expr(node.format_spec.as_deref(), scope)
        }
        Expr::JoinedStr(node) => walk_exprs(&node.values, scope),
        Expr::Attribute(node) => walk_expr(&node.value, scope),
        Expr::Subscript(node) => {
            walk_expr(&node.value, scope)?;
            walk_expr(&node.slice, scope)
        }
        Expr::Starred(node) => walk_expr(&node.value, scope),
        Expr::List(node) => walk_exprs(&node.elts, scope),
        Expr::Tuple(node) => walk_exprs(&node.elts, scope),
        Expr::Slice(node) => {
            walk_opt_expr(node.lower.as_deref(), scope)?;
            walk_opt_expr(node.upper.as_deref(), scope)?;
            walk_opt_expr(node.step.as_deref(), scope)
        }
        Expr::Constant(_) | Expr::Name(_) => Ok(()),
    }
}

/// Decorators, defaults and annotations run in the enclosing scope.
fn walk_signature(
    args: &Arguments,
    decorators: &[Expr],
    returns: Option<&Expr>,
    scope: Scope,
) -> Verdict {
    walk_exprs(decorators, scope)?;
    walk_arguments(args, scope)?;
    walk_opt_expr(returns, scope)
}

fn walk_arguments(args: &Arguments, scope: Scope) -> Verdict {
    for arg in args
        .posonlyargs
        .iter()
        .chain(&args.args)
        .chain(&args.kwonlyargs)
    {
        walk_opt_expr(arg.def.annotation.as_deref(), scope)?;
        walk_opt_expr(arg.default.as_deref(), scope)?;
    }
    for arg in args.vararg.iter().chain(args.kwarg.iter()) {
        walk_opt_expr(arg.annotation.as_deref(), scope)?;
    }
    Ok(())
}

fn walk_for(target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt], scope: Scope) -> Verdict {
    check_target(target, Target::Store, scope)?;
    walk_expr(iter, scope)?;
    walk_body(body, scope.loop_body())?;
    walk_body(orelse, scope)
}

fn walk_with_items(items: &[WithItem], scope: Scope) -> Verdict {
    items.iter().try_for_each(|item| {
        walk_expr(&item.context_expr, scope)?;
        item.optional_vars
            .as_deref()
            .map_or(Ok(()), |vars| check_target(vars, Target::Store, scope))
    })
}

fn walk_handlers(handlers: &[ExceptHandler], scope: Scope) -> Verdict {
    handlers.iter().try_for_each(|handler| match handler {
        ExceptHandler::ExceptHandler(node) => {
            walk_opt_expr(node.type_.as_deref(), scope)?;
            walk_body(&node.body, scope)
        }
    })
}

fn walk_comprehension(elts: &[&Expr], generators: &[Comprehension], scope: Scope) -> Verdict {
    let inner = scope.comprehension();
    for generator in generators {
        check_target(&generator.target, Target::Store, inner)?;
        walk_expr(&generator.iter, inner)?;
        walk_exprs(&generator.ifs, inner)?;
    }
    elts.iter().try_for_each(|elt| walk_expr(elt, inner))
}

fn require_async(scope: Scope, keyword: &str) -> Verdict {
    if scope.is_async() {
        Ok(())
    } else {
        Err(format!("'{keyword}' outside async function"))
    }
}

fn check_yield(scope: Scope, keyword: &str) -> Verdict {
    if scope.function.is_none() {
        return Err(format!("'{keyword}' outside function"));
    }
    if scope.in_comprehension {
        return Err(format!("'{keyword}' inside comprehension"));
    }
    Ok(())
}

/// Targets must be storable: a name, attribute or subscript, or for plain
/// assignment and `del` a list or tuple of those.
fn check_target(target: &Expr, kind: Target, scope: Scope) -> Verdict {
    match target {
        Expr::Name(_) => Ok(()),
        Expr::Attribute(node) => walk_expr(&node.value, scope),
        Expr::Subscript(node) => {
            walk_expr(&node.value, scope)?;
            walk_expr(&node.slice, scope)
        }
        Expr::List(node) => check_sequence_target(&node.elts, "list", kind, scope),
        Expr::Tuple(node) => check_sequence_target(&node.elts, "tuple", kind, scope),
        Expr::Starred(_) => Err(match kind {
            Target::Store => "starred assignment target must be in a list or tuple".to_string(),
            Target::Delete | Target::Augmented | Target::Annotated => kind.invalid("starred"),
        }),
        other => Err(kind.invalid(describe(other))),
    }
}

fn check_sequence_target(elts: &[Expr], shape: &str, kind: Target, scope: Scope) -> Verdict {
    match kind {
        Target::Store => elts.iter().try_for_each(|elt| match elt {
            Expr::Starred(node) => check_target(&node.value, kind, scope),
            elt => check_target(elt, kind, scope),
        }),
        Target::Delete => elts
            .iter()
            .try_for_each(|elt| check_target(elt, kind, scope)),
        Target::Augmented => Err(kind.invalid(shape)),
        Target::Annotated => Err(format!("only single target (not {shape}) can be annotated")),
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call(_) => "function call",
        Expr::Constant(_) => "literal",
        Expr::Compare(_) => "comparison",
        Expr::Lambda(_) => "lambda",
        Expr::Await(_) => "await expression",
        Expr::Yield(_) | Expr::YieldFrom(_) => "yield expression",
        Expr::IfExp(_) => "conditional expression",
        Expr::NamedExpr(_) => "named expression",
        Expr::JoinedStr(_) | Expr::FormattedValue(_) => "f-string expression",
        Expr::Dict(_) => "dict literal",
        Expr::Set(_) => "set display",
        Expr::ListComp(_) => "list comprehension",
        Expr::SetComp(_) => "set comprehension",
        Expr::DictComp(_) => "dict comprehension",
        Expr::GeneratorExp(_) => "generator expression",
        Expr::Name(_) => "name",
        Expr::Attribute(_) => "attribute",
        Expr::Subscript(_) => "subscript",
        Expr::Starred(_) => "starred",
        Expr::List(_) => "list",
        Expr::Tuple(_) => "tuple",
        Expr::Slice(_) => "slice",
        Expr::BoolOp(_) | Expr::BinOp(_) | Expr::UnaryOp(_) => "expression",
    }
}

#[cfg(test)]
mod tests {
    use crate::core::syntax::parse;
    use crate::core::types::RejectReason;

    fn compile_error(code: &str) -> String {
        match parse(code) {
            Err(RejectReason::Compile { details }) => details,
            other => panic!("expected compile error for {code:?}, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unstorable_targets() {
        assert_eq!(compile_error("f() = 1\n"), "cannot assign to function call");
        assert_eq!(compile_error("x + 1 = 2\n"), "cannot assign to expression");
        assert_eq!(compile_error("del f()\n"), "cannot delete function call");
        assert_eq!(
            compile_error("(a, b) += 1\n"),
            "'tuple' is an illegal expression for augmented assignment"
        );
        assert_eq!(compile_error("a, f() = xs\n"), "cannot assign to function call");
    }

    #[test]
    fn rejects_keywords_outside_their_construct() {
        assert_eq!(compile_error("return 1\n"), "'return' outside function");
        assert_eq!(compile_error("break\n"), "'break' outside loop");
        assert_eq!(compile_error("continue\n"), "'continue' not properly in loop");
        assert_eq!(
            compile_error("nonlocal q\n"),
            "nonlocal declaration not allowed at module level"
        );
        assert_eq!(compile_error("await foo()\n"), "'await' outside async function");
        assert_eq!(compile_error("x = yield 1\n"), "'yield' outside function");
    }

    #[test]
    fn nested_scopes_reset_what_is_allowed() {
        assert_eq!(
            compile_error("for i in xs:\n    def f():\n        break\n"),
            "'break' outside loop"
        );
        assert_eq!(
            compile_error("def f():\n    class C:\n        return 1\n"),
            "'return' outside function"
        );
        assert_eq!(
            compile_error("def f():\n    await g()\n"),
            "'await' outside async function"
        );
        assert_eq!(
            compile_error("def f():\n    return [(yield x) for x in xs]\n"),
            "'yield' inside comprehension"
        );
        assert_eq!(
            compile_error("for i in xs:\n    pass\nelse:\n    break\n"),
            "'break' outside loop"
        );
    }

    #[test]
    fn accepts_well_formed_code() {
        let code = r#"
a, *rest = [1, 2, 3]
obj.attr, items[0] = 1, 2
del items[0], obj.attr
total: int = 0
total += 1

def gen(xs):
    nonlocal_free = 0
    for x in xs:
        if x:
            continue
        yield x
    while True:
        break
    return nonlocal_free

def outer():
    count = 0
    class Inner:
        nonlocal count
    return Inner

async def fetch(client):
    async with client as c:
        async for row in c:
            await row.save()
    return [await r for r in client.rows]

square = lambda v: v * v
"#;
        assert!(parse(code).is_ok(), "{:?}", parse(code).err());
    }
}
