//! Request handling and expression evaluation for the memory engine.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use engine_bridge_core::{
    OutputStore, Primitive, RemoteFault,
    protocol::{EngineRequest, WireValue},
};

use super::{
    FunctionTable,
    heap::{EngineScope, Heap, STRUCT_CLASS, Slot},
    script::{self, Expr, Statement},
};

/// Workspace variable that receives the value of bare expressions.
const ANS: &str = "ans";

fn undefined(name: &str) -> RemoteFault {
    RemoteFault::new(format!("Undefined function or variable '{name}'."))
        .with_identifier("Engine:UndefinedFunction")
}

fn too_many_outputs() -> RemoteFault {
    RemoteFault::new("Too many output arguments.").with_identifier("Engine:TooManyOutputs")
}

fn bad_args(function: &str) -> RemoteFault {
    RemoteFault::new(format!("Invalid arguments to '{function}'."))
        .with_identifier("Engine:invalidInput")
}

/// State of one memory engine instance.
pub(crate) struct EngineState {
    cwd: PathBuf,
    workspace: HashMap<String, Slot>,
    heap: Heap,
    functions: Arc<FunctionTable>,
}

impl EngineState {
    pub(crate) fn new(cwd: PathBuf, functions: Arc<FunctionTable>) -> Self {
        Self {
            cwd,
            workspace: HashMap::new(),
            heap: Heap::new(),
            functions,
        }
    }

    pub(crate) fn handle(
        &mut self,
        request: EngineRequest,
        output: &OutputStore,
    ) -> Result<Vec<WireValue>, RemoteFault> {
        match request {
            EngineRequest::ChangeDirectory { path } => {
                self.change_directory(&path)?;
                Ok(Vec::new())
            }
            EngineRequest::Evaluate {
                expression,
                nargout,
            } => {
                let statements = script::parse(&expression)
                    .map_err(|e| RemoteFault::new(e.0).with_identifier("Engine:parse"))?;
                let mut last = None;
                for statement in statements {
                    last = self.exec(statement, output)?;
                }
                self.shape(last, nargout)
            }
            EngineRequest::Call {
                function,
                args,
                nargout,
            } => {
                let args = args
                    .into_iter()
                    .map(|a| self.heap.from_wire(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.call_function(&function, args, output)?;
                self.shape(result, nargout)
            }
            EngineRequest::WorkspaceSet { name, value } => {
                if !is_valid_name(&name) {
                    return Err(RemoteFault::new(format!(
                        "'{name}' is not a valid variable name."
                    ))
                    .with_identifier("Engine:invalidVariableName"));
                }
                let slot = self.heap.from_wire(value)?;
                self.workspace.insert(name, slot);
                Ok(Vec::new())
            }
            EngineRequest::WorkspaceGet { name } => {
                let slot = self.workspace.get(&name).ok_or_else(|| {
                    RemoteFault::new(format!("Undefined variable '{name}'."))
                        .with_identifier("Engine:UndefinedVariable")
                })?;
                Ok(vec![self.heap.to_wire(slot)])
            }
            EngineRequest::Shutdown => Ok(Vec::new()),
        }
    }

    fn change_directory(&mut self, path: &str) -> Result<(), RemoteFault> {
        let target = normalize(&self.cwd.join(path));
        if !target.is_dir() {
            return Err(RemoteFault::new(format!(
                "Cannot CD to {path} (Name is nonexistent or not a directory)."
            ))
            .with_identifier("Engine:cd:NonExistentFolder"));
        }
        self.cwd = target;
        Ok(())
    }

    fn shape(&self, result: Option<Slot>, nargout: u32) -> Result<Vec<WireValue>, RemoteFault> {
        match (nargout, result) {
            (0, _) => Ok(Vec::new()),
            (1, Some(slot)) => Ok(vec![self.heap.to_wire(&slot)]),
            _ => Err(too_many_outputs()),
        }
    }

    fn exec(&mut self, statement: Statement, output: &OutputStore) -> Result<Option<Slot>, RemoteFault> {
        match statement {
            Statement::Expr(expr) => {
                let value = self.eval(&expr, output)?;
                if let Some(v) = &value {
                    self.workspace.insert(ANS.to_string(), v.clone());
                }
                Ok(value)
            }
            Statement::Assign { target, value } => {
                let value = self.eval(&value, output)?.ok_or_else(too_many_outputs)?;
                let (root, fields) = target
                    .split_first()
                    .ok_or_else(|| RemoteFault::new("Empty assignment target."))?;
                let Some((last, path)) = fields.split_last() else {
                    self.workspace.insert(root.clone(), value);
                    return Ok(None);
                };
                let mut current = self.workspace.get(root).cloned().ok_or_else(|| undefined(root))?;
                for field in path {
                    current = self.field_of(&current, field)?;
                }
                let Slot::Object(id) = current else {
                    return Err(RemoteFault::new(
                        "Field assignment to a non-object value is not supported.",
                    ));
                };
                self.heap.set_field(id, last, value)?;
                Ok(None)
            }
        }
    }

    fn eval(&mut self, expr: &Expr, output: &OutputStore) -> Result<Option<Slot>, RemoteFault> {
        match expr {
            Expr::Literal(p) => Ok(Some(Slot::Primitive(p.clone()))),
            Expr::Neg(inner) => match self.eval_value(inner, output)? {
                // Engine integers saturate.
                Slot::Primitive(Primitive::Integer(i)) => Ok(Some(Slot::from(i.saturating_neg()))),
                Slot::Primitive(Primitive::Number(n)) => Ok(Some(Slot::from(-n))),
                _ => Err(RemoteFault::new("Unary minus requires a numeric value.")),
            },
            Expr::Name(name) => {
                if let Some(slot) = self.workspace.get(name) {
                    return Ok(Some(slot.clone()));
                }
                if self.is_function(name) {
                    return self.call_function(name, Vec::new(), output);
                }
                Err(undefined(name))
            }
            Expr::Field(base, field) => {
                if let Some(path) = expr.dotted_path() {
                    if !self.workspace.contains_key(&path[0]) {
                        let function = path.join(".");
                        if self.is_function(&function) {
                            return self.call_function(&function, Vec::new(), output);
                        }
                        return Err(undefined(&function));
                    }
                }
                let base = self.eval_value(base, output)?;
                self.field_of(&base, field).map(Some)
            }
            Expr::Call(callee, args) => {
                let Some(path) = callee.dotted_path() else {
                    return Err(RemoteFault::new("Invalid call target."));
                };
                if self.workspace.contains_key(&path[0]) {
                    if args.is_empty() {
                        return self.eval(callee, output);
                    }
                    return Err(RemoteFault::new(format!(
                        "Indexing into '{}' is not supported.",
                        path.join(".")
                    )));
                }
                let args = args
                    .iter()
                    .map(|a| self.eval_value(a, output))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_function(&path.join("."), args, output)
            }
        }
    }

    /// Evaluate where a value is required.
    fn eval_value(&mut self, expr: &Expr, output: &OutputStore) -> Result<Slot, RemoteFault> {
        self.eval(expr, output)?.ok_or_else(too_many_outputs)
    }

    fn field_of(&self, base: &Slot, field: &str) -> Result<Slot, RemoteFault> {
        match base {
            Slot::Object(id) => self.heap.field(*id, field),
            Slot::Fault(fault) => match field {
                "message" => Ok(fault.message.clone().into()),
                "identifier" => Ok(fault.identifier.clone().unwrap_or_default().into()),
                _ => Err(RemoteFault::new(format!("No property '{field}' for MException."))),
            },
            Slot::Primitive(_) => Err(RemoteFault::new(
                "Dot indexing is not supported for variables of this type.",
            )
            .with_identifier("Engine:structRefFromNonStruct")),
        }
    }

    fn is_function(&self, name: &str) -> bool {
        self.functions.contains_key(name) || BUILTINS.contains(&name)
    }

    fn call_function(
        &mut self,
        name: &str,
        args: Vec<Slot>,
        output: &OutputStore,
    ) -> Result<Option<Slot>, RemoteFault> {
        tracing::trace!(function = name, argc = args.len(), "Memory engine call");
        if let Some(function) = self.functions.get(name).cloned() {
            let mut scope = EngineScope {
                heap: &mut self.heap,
                cwd: &self.cwd,
                output,
            };
            return function(&mut scope, args);
        }
        self.builtin(name, args, output)
    }

    fn builtin(
        &mut self,
        name: &str,
        args: Vec<Slot>,
        output: &OutputStore,
    ) -> Result<Option<Slot>, RemoteFault> {
        match (name, args.as_slice()) {
            ("disp", [value]) => {
                output.push_stdout(self.heap.render(value));
                Ok(None)
            }
            ("pwd", []) => Ok(Some(self.cwd.to_string_lossy().into_owned().into())),
            ("struct", pairs) if pairs.len() % 2 == 0 => {
                let id = self.heap.alloc(STRUCT_CLASS);
                for pair in pairs.chunks(2) {
                    let field = pair[0].as_text().ok_or_else(|| bad_args(name))?;
                    self.heap.set_field(id, field, pair[1].clone())?;
                }
                Ok(Some(Slot::Object(id)))
            }
            ("setfield", [Slot::Object(id), field, value]) => {
                let field = field.as_text().ok_or_else(|| bad_args(name))?;
                self.heap.set_field(*id, field, value.clone())?;
                Ok(Some(Slot::Object(*id)))
            }
            ("getfield", [base, field]) => {
                let field = field.as_text().ok_or_else(|| bad_args(name))?;
                self.field_of(base, field).map(Some)
            }
            ("isfield", [base, field]) => {
                let field = field.as_text().ok_or_else(|| bad_args(name))?;
                Ok(Some(self.field_of(base, field).is_ok().into()))
            }
            ("class", [value]) => {
                let scope = EngineScope {
                    heap: &mut self.heap,
                    cwd: &self.cwd,
                    output,
                };
                Ok(Some(scope.class_of(value).into()))
            }
            ("fullfile", parts) if !parts.is_empty() => {
                let mut path = PathBuf::new();
                for part in parts {
                    path.push(part.as_text().ok_or_else(|| bad_args(name))?);
                }
                Ok(Some(path.to_string_lossy().into_owned().into()))
            }
            ("isfile" | "isfolder", [path]) => {
                let path = self.cwd.join(path.as_text().ok_or_else(|| bad_args(name))?);
                let found = if name == "isfile" { path.is_file() } else { path.is_dir() };
                Ok(Some(found.into()))
            }
            ("error", [message, rest @ ..]) => {
                let message = message.as_text().ok_or_else(|| bad_args(name))?;
                let fault = match rest {
                    // error(identifier, message)
                    [text] => RemoteFault::new(text.as_text().ok_or_else(|| bad_args(name))?)
                        .with_identifier(message),
                    _ => RemoteFault::new(message),
                };
                Err(fault)
            }
            _ if BUILTINS.contains(&name) => Err(bad_args(name)),
            _ => Err(undefined(name)),
        }
    }
}

const BUILTINS: &[&str] = &[
    "disp", "pwd", "struct", "setfield", "getfield", "isfield", "class", "fullfile", "isfile",
    "isfolder", "error",
];

/// Engine variable names: a letter followed by letters, digits or underscores.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EngineState {
        EngineState::new(std::env::temp_dir(), Arc::new(FunctionTable::new()))
    }

    fn eval1(state: &mut EngineState, expression: &str) -> Result<WireValue, RemoteFault> {
        let output = OutputStore::new();
        let mut values = state.handle(
            EngineRequest::Evaluate {
                expression: expression.into(),
                nargout: 1,
            },
            &output,
        )?;
        Ok(values.remove(0))
    }

    #[test]
    fn test_struct_and_field_assignment() {
        let mut state = state();
        let output = OutputStore::new();
        state
            .handle(
                EngineRequest::Evaluate {
                    expression: "s = struct('name', 'Cell', 'size', 3); s.size = 4".into(),
                    nargout: 0,
                },
                &output,
            )
            .unwrap();
        assert_eq!(eval1(&mut state, "s.size").unwrap(), WireValue::Integer { value: 4 });
        assert_eq!(
            eval1(&mut state, "getfield(s, 'name')").unwrap(),
            WireValue::Text { value: "Cell".into() }
        );
        assert_eq!(eval1(&mut state, "class(s)").unwrap(), WireValue::Text { value: "struct".into() });
    }

    #[test]
    fn test_bare_expression_sets_ans() {
        let mut state = state();
        let output = OutputStore::new();
        state
            .handle(
                EngineRequest::Evaluate {
                    expression: "-2.5".into(),
                    nargout: 0,
                },
                &output,
            )
            .unwrap();
        assert_eq!(eval1(&mut state, "ans").unwrap(), WireValue::Number { value: -2.5 });
    }

    #[test]
    fn test_error_builtin() {
        let mut state = state();
        let fault = eval1(&mut state, "error('Netabolics:init', 'toolbox missing')").unwrap_err();
        assert_eq!(fault.message, "toolbox missing");
        assert_eq!(fault.identifier.as_deref(), Some("Netabolics:init"));
    }

    #[test]
    fn test_disp_has_no_output_value() {
        let mut state = state();
        let fault = eval1(&mut state, "disp(1)").unwrap_err();
        assert_eq!(fault.identifier.as_deref(), Some("Engine:TooManyOutputs"));
    }

    #[test]
    fn test_invalid_workspace_name() {
        let mut state = state();
        let output = OutputStore::new();
        let fault = state
            .handle(
                EngineRequest::WorkspaceSet {
                    name: "1x".into(),
                    value: WireValue::Empty,
                },
                &output,
            )
            .unwrap_err();
        assert_eq!(fault.identifier.as_deref(), Some("Engine:invalidVariableName"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }

    #[test]
    fn test_negating_smallest_integer_saturates() {
        let mut state = state();
        let output = OutputStore::new();
        state
            .handle(
                EngineRequest::WorkspaceSet {
                    name: "x".into(),
                    value: WireValue::Integer { value: i64::MIN },
                },
                &output,
            )
            .unwrap();

        assert_eq!(eval1(&mut state, "-x").unwrap(), WireValue::Integer { value: i64::MAX });
        assert_eq!(eval1(&mut state, "-(-5)").unwrap(), WireValue::Integer { value: 5 });
    }
}
