//! Denylist enforcement over the Python syntax tree.
//!
//! The walk is a depth-first pre-order traversal that stops at the first
//! violation. Every statement, expression and pattern kind is matched without
//! a wildcard arm, so a grammar change cannot slip past the checker.

use rustpython_parser::ast::{
    Alias, Arg, ArgWithDefault, Arguments, Comprehension, Constant, ExceptHandler, Expr, Keyword,
    MatchCase, Pattern, Stmt, TypeParam, WithItem,
};
use tracing::{debug, warn};

use crate::core::policy::{BUILTINS_NAME, ForbiddenPolicy};
use crate::core::syntax::SyntaxTree;
use crate::core::types::{PolicyViolation, ViolationKind};

type Verdict = Result<(), PolicyViolation>;

/// Walks a [`SyntaxTree`] and rejects the first node matching the policy.
#[derive(Debug, Clone, Copy)]
pub struct SafetyChecker<'a> {
    policy: &'a ForbiddenPolicy,
}

impl<'a> SafetyChecker<'a> {
    pub fn new(policy: &'a ForbiddenPolicy) -> Self {
        Self { policy }
    }

    pub fn check(&self, tree: &SyntaxTree) -> Verdict {
        let verdict = self.walk_body(tree.statements());
        match &verdict {
            Ok(()) => debug!("safety check passed"),
            Err(violation) => warn!(kind = %violation.kind, message = %violation.message, "unsafe code"),
        }
        verdict
    }

    fn walk_body(&self, body: &[Stmt]) -> Verdict {
        body.iter().try_for_each(|stmt| self.walk_stmt(stmt))
    }

    fn walk_exprs(&self, exprs: &[Expr]) -> Verdict {
        exprs.iter().try_for_each(|expr| self.walk_expr(expr))
    }

    fn walk_opt_expr(&self, expr: Option<&Expr>) -> Verdict {
        expr.map_or(Ok(()), |expr| self.walk_expr(expr))
    }

    fn walk_stmt(&self, stmt: &Stmt) -> Verdict {
        match stmt {
            Stmt::FunctionDef(node) => {
                self.walk_decorated(&node.args, &node.body, &node.decorator_list)?;
                self.walk_opt_expr(node.returns.as_deref())?;
                self.walk_type_params(&node.type_params)
            }
            Stmt::AsyncFunctionDef(node) => {
                self.walk_decorated(&node.args, &node.body, &node.decorator_list)?;
                self.walk_opt_expr(node.returns.as_deref())?;
                self.walk_type_params(&node.type_params)
            }
            Stmt::ClassDef(node) => {
                self.walk_exprs(&node.bases)?;
                self.walk_keywords(&node.keywords)?;
                self.walk_body(&node.body)?;
                self.walk_exprs(&node.decorator_list)?;
                self.walk_type_params(&node.type_params)
            }
            Stmt::Return(node) => self.walk_opt_expr(node.value.as_deref()),
            Stmt::Delete(node) => self.walk_exprs(&node.targets),
            Stmt::Assign(node) => {
                self.walk_exprs(&node.targets)?;
                self.walk_expr(&node.value)
            }
            Stmt::TypeAlias(node) => {
                self.walk_expr(&node.name)?;
                self.walk_type_params(&node.type_params)?;
                self.walk_expr(&node.value)
            }
            Stmt::AugAssign(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.value)
            }
            Stmt::AnnAssign(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.annotation)?;
                self.walk_opt_expr(node.value.as_deref())
            }
            Stmt::For(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.iter)?;
                self.walk_body(&node.body)?;
                self.walk_body(&node.orelse)
            }
            Stmt::AsyncFor(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.iter)?;
                self.walk_body(&node.body)?;
                self.walk_body(&node.orelse)
            }
            Stmt::While(node) => {
                self.walk_expr(&node.test)?;
                self.walk_body(&node.body)?;
                self.walk_body(&node.orelse)
            }
            Stmt::If(node) => {
                self.walk_expr(&node.test)?;
                self.walk_body(&node.body)?;
                self.walk_body(&node.orelse)
            }
            Stmt::With(node) => {
                self.walk_with_items(&node.items)?;
                self.walk_body(&node.body)
            }
            Stmt::AsyncWith(node) => {
                self.walk_with_items(&node.items)?;
                self.walk_body(&node.body)
            }
            Stmt::Match(node) => {
                self.walk_expr(&node.subject)?;
                node.cases
                    .iter()
                    .try_for_each(|case| self.walk_match_case(case))
            }
            Stmt::Raise(node) => {
                self.walk_opt_expr(node.exc.as_deref())?;
                self.walk_opt_expr(node.cause.as_deref())
            }
            Stmt::Try(node) => {
                self.walk_body(&node.body)?;
                self.walk_handlers(&node.handlers)?;
                self.walk_body(&node.orelse)?;
                self.walk_body(&node.finalbody)
            }
            Stmt::TryStar(node) => {
                self.walk_body(&node.body)?;
                self.walk_handlers(&node.handlers)?;
                self.walk_body(&node.orelse)?;
                self.walk_body(&node.finalbody)
            }
            Stmt::Assert(node) => {
                self.walk_expr(&node.test)?;
                self.walk_opt_expr(node.msg.as_deref())
            }
            Stmt::Import(node) => self.check_import(&node.names),
            Stmt::ImportFrom(node) => match &node.module {
                Some(module) if self.policy.is_forbidden_module_path(module.as_str()) => {
                    Err(PolicyViolation::new(
                        ViolationKind::ForbiddenImport,
                        format!("import from forbidden module: {}", module.as_str()),
                    ))
                }
                _ => Ok(()),
            },
            Stmt::Expr(node) => self.walk_expr(&node.value),
            Stmt::Global(_)
            | Stmt::Nonlocal(_)
            | Stmt::Pass(_)
            | Stmt::Break(_)
            | Stmt::Continue(_) => Ok(()),
        }
    }

    fn walk_expr(&self, expr: &Expr) -> Verdict {
        match expr {
            Expr::BoolOp(node) => self.walk_exprs(&node.values),
            Expr::NamedExpr(node) => {
                self.walk_expr(&node.target)?;
                self.walk_expr(&node.value)
            }
            Expr::BinOp(node) => {
                self.walk_expr(&node.left)?;
                self.walk_expr(&node.right)
            }
            Expr::UnaryOp(node) => self.walk_expr(&node.operand),
            Expr::Lambda(node) => {
                self.walk_arguments(&node.args)?;
                self.walk_expr(&node.body)
            }
            Expr::IfExp(node) => {
                self.walk_expr(&node.test)?;
                self.walk_expr(&node.body)?;
                self.walk_expr(&node.orelse)
            }
            Expr::Dict(node) => {
                node.keys
                    .iter()
                    .try_for_each(|key| self.walk_opt_expr(key.as_ref()))?;
                self.walk_exprs(&node.values)
            }
            Expr::Set(node) => self.walk_exprs(&node.elts),
            Expr::ListComp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::SetComp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::DictComp(node) => {
                self.walk_expr(&node.key)?;
                self.walk_expr(&node.value)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::GeneratorExp(node) => {
                self.walk_expr(&node.elt)?;
                self.walk_comprehensions(&node.generators)
            }
            Expr::Await(node) => self.walk_expr(&node.value),
            Expr::Yield(node) => self.walk_opt_expr(node.value.as_deref()),
            Expr::YieldFrom(node) => self.walk_expr(&node.value),
            Expr::Compare(node) => {
                self.walk_expr(&node.left)?;
                self.walk_exprs(&node.comparators)
            }
            Expr::Call(node) => {
                self.check_call_target(&node.func)?;
                self.walk_expr(&node.func)?;
                self.walk_exprs(&node.args)?;
                self.walk_keywords(&node.keywords)
            }
            Expr::FormattedValue(node) => {
                self.walk_expr(&node.value)?;
                self.walk_opt_expr(node.format_spec.as_deref())
            }
            Expr::JoinedStr(node) => self.walk_exprs(&node.values),
            Expr::Constant(node) => self.check_constant(&node.value),
            Expr::Attribute(node) => {
                self.check_attribute(&node.value, node.attr.as_str())?;
                self.walk_expr(&node.value)
            }
            Expr::Subscript(node) => {
                self.walk_expr(&node.value)?;
                self.walk_expr(&node.slice)
            }
            Expr::Starred(node) => self.walk_expr(&node.value),
            Expr::Name(node) => self.check_name(node.id.as_str()),
            Expr::List(node) => self.walk_exprs(&node.elts),
            Expr::Tuple(node) => self.walk_exprs(&node.elts),
            Expr::Slice(node) => {
                self.walk_opt_expr(node.lower.as_deref())?;
                self.walk_opt_expr(node.upper.as_deref())?;
                self.walk_opt_expr(node.step.as_deref())
            }
        }
    }

    fn walk_pattern(&self, pattern: &Pattern) -> Verdict {
        match pattern {
            Pattern::MatchValue(node) => self.walk_expr(&node.value),
            Pattern::MatchSingleton(node) => self.check_constant(&node.value),
            Pattern::MatchSequence(node) => self.walk_patterns(&node.patterns),
            Pattern::MatchMapping(node) => {
                self.walk_exprs(&node.keys)?;
                self.walk_patterns(&node.patterns)
            }
            Pattern::MatchClass(node) => {
                self.walk_expr(&node.cls)?;
                self.walk_patterns(&node.patterns)?;
                self.walk_patterns(&node.kwd_patterns)
            }
            Pattern::MatchStar(_) => Ok(()),
            Pattern::MatchAs(node) => node
                .pattern
                .as_deref()
                .map_or(Ok(()), |inner| self.walk_pattern(inner)),
            Pattern::MatchOr(node) => self.walk_patterns(&node.patterns),
        }
    }

    fn walk_patterns(&self, patterns: &[Pattern]) -> Verdict {
        patterns
            .iter()
            .try_for_each(|pattern| self.walk_pattern(pattern))
    }

    fn walk_match_case(&self, case: &MatchCase) -> Verdict {
        self.walk_pattern(&case.pattern)?;
        self.walk_opt_expr(case.guard.as_deref())?;
        self.walk_body(&case.body)
    }

    fn walk_handlers(&self, handlers: &[ExceptHandler]) -> Verdict {
        handlers.iter().try_for_each(|handler| match handler {
            ExceptHandler::ExceptHandler(node) => {
                self.walk_opt_expr(node.type_.as_deref())?;
                self.walk_body(&node.body)
            }
        })
    }

    fn walk_decorated(&self, args: &Arguments, body: &[Stmt], decorators: &[Expr]) -> Verdict {
        self.walk_arguments(args)?;
        self.walk_body(body)?;
        self.walk_exprs(decorators)
    }

    fn walk_arguments(&self, args: &Arguments) -> Verdict {
        self.walk_args_with_defaults(&args.posonlyargs)?;
        self.walk_args_with_defaults(&args.args)?;
        if let Some(vararg) = &args.vararg {
            self.walk_arg(vararg)?;
        }
        self.walk_args_with_defaults(&args.kwonlyargs)?;
        if let Some(kwarg) = &args.kwarg {
            self.walk_arg(kwarg)?;
        }
        Ok(())
    }

    fn walk_args_with_defaults(&self, args: &[ArgWithDefault]) -> Verdict {
        args.iter().try_for_each(|arg| {
            self.walk_arg(&arg.def)?;
            self.walk_opt_expr(arg.default.as_deref())
        })
    }

    fn walk_arg(&self, arg: &Arg) -> Verdict {
        self.walk_opt_expr(arg.annotation.as_deref())
    }

    fn walk_keywords(&self, keywords: &[Keyword]) -> Verdict {
        keywords
            .iter()
            .try_for_each(|keyword| self.walk_expr(&keyword.value))
    }

    fn walk_with_items(&self, items: &[WithItem]) -> Verdict {
        items.iter().try_for_each(|item| {
            self.walk_expr(&item.context_expr)?;
            self.walk_opt_expr(item.optional_vars.as_deref())
        })
    }

    fn walk_comprehensions(&self, generators: &[Comprehension]) -> Verdict {
        generators.iter().try_for_each(|generator| {
            self.walk_expr(&generator.target)?;
            self.walk_expr(&generator.iter)?;
            self.walk_exprs(&generator.ifs)
        })
    }

    fn walk_type_params(&self, params: &[TypeParam]) -> Verdict {
        params.iter().try_for_each(|param| match param {
            TypeParam::TypeVar(node) => self.walk_opt_expr(node.bound.as_deref()),
            TypeParam::ParamSpec(_) | TypeParam::TypeVarTuple(_) => Ok(()),
        })
    }

    fn check_import(&self, names: &[Alias]) -> Verdict {
        for alias in names {
            let module = alias.name.as_str();
            if self.policy.is_forbidden_module_path(module) {
                return Err(PolicyViolation::new(
                    ViolationKind::ForbiddenImport,
                    format!("import of forbidden module: {module}"),
                ));
            }
        }
        Ok(())
    }

    fn check_name(&self, name: &str) -> Verdict {
        if self.policy.is_forbidden_name(name) {
            return Err(PolicyViolation::new(
                ViolationKind::ForbiddenName,
                format!("forbidden name: {name}"),
            ));
        }
        if name == BUILTINS_NAME {
            return Err(PolicyViolation::new(
                ViolationKind::BuiltinsAccess,
                format!("access to {BUILTINS_NAME} is forbidden"),
            ));
        }
        Ok(())
    }

    fn check_attribute(&self, receiver: &Expr, attr: &str) -> Verdict {
        let receiver_name = bare_name(receiver);
        if let Some(module) = receiver_name
            && self.policy.is_forbidden_module(module)
        {
            return Err(PolicyViolation::new(
                ViolationKind::ForbiddenAttributeAccess,
                format!("forbidden module attribute access: {module}.{attr}"),
            ));
        }
        // Applies to any receiver shape, e.g. `self.proc.run`.
        if self.policy.is_forbidden_attribute(attr) {
            return Err(PolicyViolation::new(
                ViolationKind::ForbiddenAttributeAccess,
                format!(
                    "forbidden attribute access: {}.{attr}",
                    receiver_name.unwrap_or("<expr>")
                ),
            ));
        }
        Ok(())
    }

    fn check_call_target(&self, func: &Expr) -> Verdict {
        let Expr::Attribute(callee) = func else {
            return Ok(());
        };
        let attr = callee.attr.as_str();
        let receiver_name = bare_name(&callee.value);
        if let Some(module) = receiver_name {
            if self.policy.is_dynamic_import_module(module) {
                return Err(PolicyViolation::new(
                    ViolationKind::ForbiddenCall,
                    format!("dynamic imports via {module} are forbidden"),
                ));
            }
            if self.policy.is_forbidden_module(module) {
                return Err(PolicyViolation::new(
                    ViolationKind::ForbiddenCall,
                    format!("forbidden module call: {module}.{attr}"),
                ));
            }
        }
        if self.policy.is_forbidden_attribute(attr) {
            return Err(PolicyViolation::new(
                ViolationKind::ForbiddenCall,
                format!(
                    "forbidden attribute call: {}.{attr}",
                    receiver_name.unwrap_or("<expr>")
                ),
            ));
        }
        Ok(())
    }

    fn check_constant(&self, constant: &Constant) -> Verdict {
        match constant {
            Constant::Str(value) if self.policy.is_forbidden_string(value) => {
                Err(PolicyViolation::new(
                    ViolationKind::ForbiddenLiteral,
                    format!("forbidden string literal: {value}"),
                ))
            }
            Constant::Tuple(items) => items.iter().try_for_each(|item| self.check_constant(item)),
            Constant::None
            | Constant::Bool(_)
            | Constant::Str(_)
            | Constant::Bytes(_)
            | Constant::Int(_)
            | Constant::Float(_)
            | Constant::Complex { .. }
            | Constant::Ellipsis => Ok(()),
        }
    }
}

fn bare_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Name(name) => Some(name.id.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::syntax::parse;

    fn check(code: &str) -> Verdict {
        let policy = ForbiddenPolicy::default();
        let tree = parse(code).expect("parse");
        SafetyChecker::new(&policy).check(&tree)
    }

    fn kind_of(code: &str) -> ViolationKind {
        check(code).expect_err("expected violation").kind
    }

    #[test]
    fn clean_spark_job_passes() {
        let code = r#"
from pyspark.sql import SparkSession
from pyspark.sql import functions as F

spark = SparkSession.builder.appName("users").getOrCreate()
df = spark.read.option("header", True).csv("users.csv")
counts = df.groupBy("department").agg(F.count("*").alias("users"))
counts.write.mode("overwrite").text("out")
spark.stop()
"#;
        assert_eq!(check(code), Ok(()));
    }

    #[test]
    fn rejects_direct_and_from_imports() {
        let err = check("import os\nos.system('rm -rf /')\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenImport);
        assert_eq!(err.message, "import of forbidden module: os");

        assert_eq!(kind_of("import os.path as p\n"), ViolationKind::ForbiddenImport);
        assert_eq!(
            kind_of("from subprocess import Popen\n"),
            ViolationKind::ForbiddenImport
        );
        assert_eq!(
            kind_of("from urllib.request import urlopen\n"),
            ViolationKind::ForbiddenImport
        );
    }

    #[test]
    fn relative_import_without_module_is_allowed() {
        assert_eq!(check("from . import helpers\n"), Ok(()));
    }

    #[test]
    fn rejects_forbidden_names_anywhere() {
        assert_eq!(kind_of("eval('1 + 1')\n"), ViolationKind::ForbiddenName);
        assert_eq!(
            kind_of("def f(x=open):\n    return x\n"),
            ViolationKind::ForbiddenName
        );
        assert_eq!(
            kind_of("rows = [vars(r) for r in data]\n"),
            ViolationKind::ForbiddenName
        );
    }

    #[test]
    fn rejects_builtins_registry() {
        let err = check("b = __builtins__\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::BuiltinsAccess);
    }

    #[test]
    fn attribute_on_forbidden_module_is_rejected() {
        let err = check("x = sys.argv\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenAttributeAccess);
        assert_eq!(err.message, "forbidden module attribute access: sys.argv");
    }

    #[test]
    fn forbidden_attribute_on_safe_receiver_is_rejected() {
        assert_eq!(
            kind_of("handler = fs.remove\n"),
            ViolationKind::ForbiddenAttributeAccess
        );
        assert_eq!(
            kind_of("handler = self.proc.popen\n"),
            ViolationKind::ForbiddenAttributeAccess
        );
    }

    #[test]
    fn calls_are_checked_before_their_callee() {
        let err = check("shutil.rmtree('/data')\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenCall);
        assert_eq!(err.message, "forbidden module call: shutil.rmtree");

        assert_eq!(kind_of("job.run()\n"), ViolationKind::ForbiddenCall);
    }

    #[test]
    fn dynamic_import_call_is_rejected_regardless_of_attribute() {
        let err = check("m = importlib.reload(mod)\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenCall);
        assert_eq!(err.message, "dynamic imports via importlib are forbidden");
    }

    #[test]
    fn rejects_string_smuggling() {
        let err = check("fn = getattr(builtins, 'eval')\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenLiteral);
        assert_eq!(err.message, "forbidden string literal: eval");

        assert_eq!(
            kind_of("def f():\n    \"os\"\n"),
            ViolationKind::ForbiddenLiteral
        );
        assert_eq!(
            kind_of("name = f\"{prefix}subprocess\" if x else 'subprocess'\n"),
            ViolationKind::ForbiddenLiteral
        );
    }

    #[test]
    fn literal_containing_token_is_not_exact_match() {
        assert_eq!(check("label = 'os and sys'\n"), Ok(()));
    }

    #[test]
    fn walks_nested_statements() {
        let code = "class Job:\n    def go(self):\n        try:\n            pass\n        except Exception:\n            exec('x')\n";
        assert_eq!(kind_of(code), ViolationKind::ForbiddenName);

        let code = "with ctx() as c:\n    while c:\n        c = compile\n";
        assert_eq!(kind_of(code), ViolationKind::ForbiddenName);
    }

    #[test]
    fn walks_match_patterns() {
        let code = "match cmd:\n    case {'k': v} if v == globals:\n        pass\n";
        assert_eq!(kind_of(code), ViolationKind::ForbiddenName);
    }

    #[test]
    fn stops_at_first_violation() {
        let err = check("x = eval\nimport os\n").unwrap_err();
        assert_eq!(err.kind, ViolationKind::ForbiddenName);
    }
}
