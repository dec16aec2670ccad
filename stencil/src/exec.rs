//! Tree-walking execution of parsed templates.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use ast::{
    ActionNode, BranchNode, ChainNode, CommandNode, FieldNode, IdentifierNode, Node, NumberNode,
    PipeNode, SequenceNode, TemplateNode, VariableNode,
};
use errors::{ErrorLocation, ExecError, ExecErrorKind};
use parser::Tree;

use crate::builtins::BUILTINS;
use crate::funcs::{Func, FuncMap};
use crate::value::Value;

/// Max nesting of template invocations
const MAX_EXEC_DEPTH: usize = 1500;

/// Signal propagated out of loop bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopControl {
    None,
    Break,
    Continue,
}

/// Holds the dynamic value of a variable
struct Variable {
    name: String,
    value: Value,
}

/// Render the template named `name` from `trees` against `data`,
/// writing output to `writer`
pub(crate) fn execute<W: Write>(
    trees: &HashMap<String, Tree>,
    funcs: &FuncMap,
    writer: &mut W,
    name: &str,
    data: &Value,
) -> Result<(), ExecError> {
    let incomplete = || ExecError {
        kind: ExecErrorKind::IncompleteTemplate(name.to_string()),
        template_name: name.to_string(),
        location: None,
    };
    let tree = trees.get(name).ok_or_else(incomplete)?;
    let root = tree.root.as_ref().ok_or_else(incomplete)?;

    tracing::debug!(template = %name, "executing template");

    let mut state = Exec {
        trees,
        funcs,
        writer,
        template_name: name.to_string(),
        tree,
        vars: vec![Variable {
            name: "$".to_string(),
            value: data.clone(),
        }],
        depth: 0,
        for_depth: 0,
    };
    state.walk_list(data, root)?;

    Ok(())
}

/// The state of one execution
struct Exec<'a, W: Write> {
    trees: &'a HashMap<String, Tree>,
    /// User registry snapshot; shadows the built-in table
    funcs: &'a FuncMap,
    writer: &'a mut W,
    template_name: String,
    tree: &'a Tree,
    /// Stack of variable values
    vars: Vec<Variable>,
    /// Height of the stack of executing templates
    depth: usize,
    /// Nesting level of for loops
    for_depth: usize,
}

impl<'a, W: Write> Exec<'a, W> {
    // ---- error construction ----

    fn error(&self, kind: ExecErrorKind) -> ExecError {
        ExecError {
            kind,
            template_name: self.template_name.clone(),
            location: None,
        }
    }

    /// Error annotated with the position and clipped rendering of the
    /// node under evaluation
    fn error_at(&self, pos: usize, context: &dyn fmt::Display, kind: ExecErrorKind) -> ExecError {
        let (line, column) = self.tree.location_of(pos);

        ExecError {
            kind,
            template_name: self.template_name.clone(),
            location: Some(ErrorLocation {
                parse_name: self.tree.parse_name.clone(),
                line,
                column,
                context: Tree::error_context(context),
                span: pos..pos,
            }),
        }
    }

    // ---- variable stack ----

    fn push_var(&mut self, name: &str, value: Value) {
        self.vars.push(Variable {
            name: name.to_string(),
            value,
        });
    }

    /// Overwrites the last declared variable with the given name
    fn set_var(
        &mut self,
        name: &str,
        value: Value,
        pos: usize,
        context: &dyn fmt::Display,
    ) -> Result<(), ExecError> {
        for var in self.vars.iter_mut().rev() {
            if var.name == name {
                var.value = value;
                return Ok(());
            }
        }

        Err(self.error_at(
            pos,
            context,
            ExecErrorKind::UndefinedVariable(name.to_string()),
        ))
    }

    /// Overwrites the top-nth variable on the stack; used by loop
    /// iterations
    fn set_top_var(&mut self, n: usize, value: Value) {
        let slot = self.vars.len() - n;
        self.vars[slot].value = value;
    }

    fn var_value(&self, name: &str, node: &VariableNode) -> Result<Value, ExecError> {
        for var in self.vars.iter().rev() {
            if var.name == name {
                return Ok(var.value.clone());
            }
        }

        Err(self.error_at(
            node.pos,
            node,
            ExecErrorKind::UndefinedVariable(name.to_string()),
        ))
    }

    // ---- walking ----

    fn walk_list(&mut self, dot: &Value, list: &SequenceNode) -> Result<LoopControl, ExecError> {
        for node in &list.nodes {
            let control = self.walk(dot, node)?;
            if control != LoopControl::None {
                return Ok(control);
            }
        }

        Ok(LoopControl::None)
    }

    fn walk(&mut self, dot: &Value, node: &Node) -> Result<LoopControl, ExecError> {
        match node {
            Node::Action(action) => {
                // if the action declares variables, don't print the result
                let val = self.eval_pipeline(dot, Some(&action.pipe))?;
                if action.pipe.vars.is_empty() {
                    self.print_value(&val, action)?;
                }
                Ok(LoopControl::None)
            }
            Node::Text(text) => {
                self.writer.write_all(text.text.as_bytes()).map_err(|e| {
                    self.error_at(text.pos, text, ExecErrorKind::Write(e.to_string()))
                })?;
                Ok(LoopControl::None)
            }
            Node::Sequence(list) => self.walk_list(dot, list),
            Node::If(branch) => self.walk_if_or_with(false, dot, branch),
            Node::With(branch) => self.walk_if_or_with(true, dot, branch),
            Node::For(branch) => self.walk_for(dot, branch, node),
            Node::Template(template) => {
                self.walk_template(dot, template)?;
                Ok(LoopControl::None)
            }
            Node::Break(break_node) => {
                if self.for_depth == 0 {
                    return Err(self.error_at(
                        break_node.pos,
                        break_node,
                        ExecErrorKind::LoopControlOutsideFor("break".to_string()),
                    ));
                }
                Ok(LoopControl::Break)
            }
            Node::Continue(continue_node) => {
                if self.for_depth == 0 {
                    return Err(self.error_at(
                        continue_node.pos,
                        continue_node,
                        ExecErrorKind::LoopControlOutsideFor("continue".to_string()),
                    ));
                }
                Ok(LoopControl::Continue)
            }
            other => Err(self.error_at(
                other.pos(),
                other,
                ExecErrorKind::Internal(format!("unknown node: {other}")),
            )),
        }
    }

    /// Walks an `if` or `with` node; they are identical except that
    /// `with` sets dot
    fn walk_if_or_with(
        &mut self,
        is_with: bool,
        dot: &Value,
        branch: &BranchNode,
    ) -> Result<LoopControl, ExecError> {
        let mark = self.vars.len();
        let result = self.walk_if_or_with_inner(is_with, dot, branch);
        self.vars.truncate(mark);

        result
    }

    fn walk_if_or_with_inner(
        &mut self,
        is_with: bool,
        dot: &Value,
        branch: &BranchNode,
    ) -> Result<LoopControl, ExecError> {
        let val = self.eval_pipeline(dot, Some(&branch.pipe))?;
        if val.is_true() {
            if is_with {
                return self.walk_list(&val, &branch.list);
            }
            return self.walk_list(dot, &branch.list);
        }
        if let Some(else_list) = &branch.else_list {
            return self.walk_list(dot, else_list);
        }

        Ok(LoopControl::None)
    }

    fn walk_for(
        &mut self,
        dot: &Value,
        branch: &BranchNode,
        node: &Node,
    ) -> Result<LoopControl, ExecError> {
        let mark = self.vars.len();
        let result = self.walk_for_inner(dot, branch, node);
        self.vars.truncate(mark);

        result
    }

    fn walk_for_inner(
        &mut self,
        dot: &Value,
        branch: &BranchNode,
        node: &Node,
    ) -> Result<LoopControl, ExecError> {
        let val = self.eval_pipeline(dot, Some(&branch.pipe))?;
        let start_mark = self.vars.len();

        // arrays iterate element by element, mappings over their values
        // in key order
        let items: Vec<Value> = match &val {
            Value::Array(items) => items.clone(),
            Value::Map(map) => map.values().cloned().collect(),
            Value::Null => vec![],
            other => {
                return Err(self.error_at(
                    node.pos(),
                    node,
                    ExecErrorKind::NotIterable(other.to_string()),
                ));
            }
        };

        if !items.is_empty() {
            self.for_depth += 1;
            for item in items {
                if branch.pipe.vars.len() == 1 {
                    self.set_top_var(1, item.clone());
                }
                let control = self.walk_list(&item, &branch.list)?;
                self.vars.truncate(start_mark);
                if control == LoopControl::Break {
                    break;
                }
            }
            self.for_depth -= 1;
            return Ok(LoopControl::None);
        }

        if let Some(else_list) = &branch.else_list {
            return self.walk_list(dot, else_list);
        }

        Ok(LoopControl::None)
    }

    fn walk_template(&mut self, dot: &Value, template: &TemplateNode) -> Result<(), ExecError> {
        let trees = self.trees;
        let tree = trees.get(&template.name).ok_or_else(|| {
            self.error_at(
                template.pos,
                template,
                ExecErrorKind::TemplateNotDefined(template.name.clone()),
            )
        })?;
        if self.depth == MAX_EXEC_DEPTH {
            return Err(self.error_at(
                template.pos,
                template,
                ExecErrorKind::DepthExceeded(MAX_EXEC_DEPTH),
            ));
        }
        let root = tree.root.as_ref().ok_or_else(|| {
            self.error(ExecErrorKind::IncompleteTemplate(template.name.clone()))
        })?;

        // variables declared by the pipeline persist in the caller
        let dot = self.eval_pipeline(dot, template.pipe.as_ref())?;

        tracing::trace!(template = %template.name, depth = self.depth, "invoking template");

        // template invocations inherit no variables
        let saved_name = std::mem::replace(&mut self.template_name, template.name.clone());
        let saved_tree = std::mem::replace(&mut self.tree, tree);
        let saved_vars = std::mem::replace(
            &mut self.vars,
            vec![Variable {
                name: "$".to_string(),
                value: dot.clone(),
            }],
        );
        let saved_for_depth = std::mem::take(&mut self.for_depth);
        self.depth += 1;

        let result = self.walk_list(&dot, root).map(|_| ());

        self.depth -= 1;
        self.for_depth = saved_for_depth;
        self.vars = saved_vars;
        self.tree = saved_tree;
        self.template_name = saved_name;

        result
    }

    // ---- evaluation ----

    fn eval_pipeline(
        &mut self,
        dot: &Value,
        pipe: Option<&PipeNode>,
    ) -> Result<Value, ExecError> {
        let Some(pipe) = pipe else {
            return Ok(Value::Null);
        };

        // fold commands left to right; each stage's result is the next
        // stage's final argument
        let mut val: Option<Value> = None;
        for cmd in &pipe.cmds {
            val = Some(self.eval_command(dot, cmd, val.as_ref())?);
        }
        let val = val.unwrap_or(Value::Null);

        for var in &pipe.vars {
            if pipe.decl {
                self.push_var(&var.ident[0], val.clone());
            } else {
                self.set_var(&var.ident[0], val.clone(), pipe.pos, pipe)?;
            }
        }

        Ok(val)
    }

    fn eval_command(
        &mut self,
        dot: &Value,
        cmd: &CommandNode,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        let first = &cmd.args[0];
        match first {
            Node::Field(field) => self.eval_field_node(dot, field, Some(cmd.args.as_slice()), final_val),
            Node::Chain(chain) => self.eval_chain_node(dot, chain, Some(cmd.args.as_slice()), final_val),
            Node::Identifier(ident) => {
                self.eval_function(dot, ident, cmd.pos, cmd, Some(cmd.args.as_slice()), final_val)
            }
            // parenthesized pipeline: the arguments are all inside, the
            // final value is ignored
            Node::Pipe(pipe) => self.eval_pipeline(dot, Some(pipe)),
            Node::Variable(var) => self.eval_variable_node(dot, var, Some(cmd.args.as_slice()), final_val),
            _ => {
                self.assert_not_a_function(Some(cmd.args.as_slice()), final_val, first.pos(), first)?;
                match first {
                    Node::Bool(b) => Ok(Value::Bool(b.val)),
                    Node::Dot(_) => Ok(dot.clone()),
                    Node::Null(null) => {
                        Err(self.error_at(null.pos, null, ExecErrorKind::NullCommand))
                    }
                    Node::Number(number) => Ok(constant(number)),
                    Node::Str(string) => Ok(Value::String(string.text.clone())),
                    other => Err(self.error_at(
                        other.pos(),
                        other,
                        ExecErrorKind::BadCommand(other.to_string()),
                    )),
                }
            }
        }
    }

    /// Evaluate one argument; type checking happens at the eventual call
    fn eval_arg(&mut self, dot: &Value, node: &Node) -> Result<Value, ExecError> {
        match node {
            Node::Dot(_) => Ok(dot.clone()),
            Node::Null(_) => Ok(Value::Null),
            Node::Field(field) => self.eval_field_node(dot, field, None, None),
            Node::Variable(var) => self.eval_variable_node(dot, var, None, None),
            Node::Pipe(pipe) => self.eval_pipeline(dot, Some(pipe)),
            Node::Identifier(ident) => {
                self.eval_function(dot, ident, ident.pos, ident, None, None)
            }
            Node::Chain(chain) => self.eval_chain_node(dot, chain, None, None),
            Node::Bool(b) => Ok(Value::Bool(b.val)),
            Node::Number(number) => Ok(constant(number)),
            Node::Str(string) => Ok(Value::String(string.text.clone())),
            other => Err(self.error_at(
                other.pos(),
                other,
                ExecErrorKind::BadArg(other.to_string()),
            )),
        }
    }

    fn eval_field_node(
        &mut self,
        dot: &Value,
        field: &FieldNode,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        self.eval_field_chain(dot, dot.clone(), field.pos, field, &field.ident, args, final_val)
    }

    fn eval_chain_node(
        &mut self,
        dot: &Value,
        chain: &ChainNode,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        if chain.field.is_empty() {
            return Err(self.error_at(
                chain.pos,
                chain,
                ExecErrorKind::Internal("no fields in chain node".to_string()),
            ));
        }
        // (pipe).field1.field2: evaluate the head, then the fields
        let head = self.eval_arg(dot, &chain.node)?;

        self.eval_field_chain(dot, head, chain.pos, chain, &chain.field, args, final_val)
    }

    fn eval_variable_node(
        &mut self,
        dot: &Value,
        var: &VariableNode,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        // $x.field has $x as the first segment; evaluate the variable,
        // then the fields
        let value = self.var_value(&var.ident[0], var)?;
        if var.ident.len() == 1 {
            self.assert_not_a_function(args, final_val, var.pos, var)?;
            return Ok(value);
        }

        self.eval_field_chain(dot, value, var.pos, var, &var.ident[1..], args, final_val)
    }

    /// Evaluates .x.y.z possibly followed by arguments. `dot` is the
    /// environment in which arguments evaluate, while the receiver walks
    /// along the chain
    #[allow(clippy::too_many_arguments)]
    fn eval_field_chain(
        &mut self,
        dot: &Value,
        receiver: Value,
        pos: usize,
        context: &dyn fmt::Display,
        idents: &[String],
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        let mut receiver = receiver;
        let last = idents.len() - 1;
        for ident in &idents[..last] {
            receiver = self.eval_field(dot, ident, pos, context, None, None, &receiver)?;
        }

        // only the last name sees the arguments
        self.eval_field(dot, &idents[last], pos, context, args, final_val, &receiver)
    }

    /// Resolve one name against a receiver: array length, mapping key,
    /// then the value adapter's property, method, field
    #[allow(clippy::too_many_arguments)]
    fn eval_field(
        &mut self,
        dot: &Value,
        field_name: &str,
        pos: usize,
        context: &dyn fmt::Display,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
        receiver: &Value,
    ) -> Result<Value, ExecError> {
        if receiver.is_null() {
            return Err(self.error_at(
                pos,
                context,
                ExecErrorKind::NullPointer(field_name.to_string()),
            ));
        }

        if let Value::Array(items) = receiver {
            if field_name == "length" {
                return Ok(Value::Int(items.len() as i64));
            }
        }

        if let Value::Map(map) = receiver {
            // a missing key resolves to null so pipelines like
            // `.absent | default "x"` can supply fallbacks
            return Ok(map.get(field_name).cloned().unwrap_or(Value::Null));
        }

        if let Value::Object(object) = receiver {
            let object = object.clone();
            if let Some(value) = object.property(field_name) {
                return Ok(value);
            }
            if object.has_method(field_name) {
                let argv = self.eval_call_args(dot, args, final_val)?;
                return match object.method(field_name, &argv) {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(reason)) => Err(self.error_at(
                        pos,
                        context,
                        ExecErrorKind::CallFailed {
                            name: field_name.to_string(),
                            details: format!("\n({field_name}): {reason}"),
                        },
                    )),
                    None => Err(self.error_at(
                        pos,
                        context,
                        ExecErrorKind::NotAField {
                            name: field_name.to_string(),
                            type_name: object.type_name().to_string(),
                        },
                    )),
                };
            }
            if let Some(value) = object.field(field_name) {
                let has_args = args.is_some_and(|a| a.len() > 1) || final_val.is_some();
                if has_args {
                    return Err(self.error_at(
                        pos,
                        context,
                        ExecErrorKind::FieldWithArgs(field_name.to_string()),
                    ));
                }
                return Ok(value);
            }
            return Err(self.error_at(
                pos,
                context,
                ExecErrorKind::NotAField {
                    name: field_name.to_string(),
                    type_name: object.type_name().to_string(),
                },
            ));
        }

        Err(self.error_at(
            pos,
            context,
            ExecErrorKind::NotAField {
                name: field_name.to_string(),
                type_name: receiver.type_name().to_string(),
            },
        ))
    }

    fn eval_function(
        &mut self,
        dot: &Value,
        ident: &IdentifierNode,
        pos: usize,
        context: &dyn fmt::Display,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        let name = &ident.ident;
        let overloads = self.find_func(name).ok_or_else(|| {
            self.error_at(
                ident.pos,
                ident,
                ExecErrorKind::FunctionNotDefined(name.clone()),
            )
        })?;

        self.eval_call(dot, &overloads, pos, context, name, args, final_val)
    }

    fn find_func(&self, name: &str) -> Option<Vec<Func>> {
        self.funcs
            .get(name)
            .cloned()
            .or_else(|| BUILTINS.get(name).cloned())
    }

    /// Executes a function call. Overloads are tried in registration
    /// order; the first success wins and every failure is reported when
    /// none succeeds
    #[allow(clippy::too_many_arguments)]
    fn eval_call(
        &mut self,
        dot: &Value,
        overloads: &[Func],
        pos: usize,
        context: &dyn fmt::Display,
        name: &str,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Value, ExecError> {
        let argv = self.eval_call_args(dot, args, final_val)?;

        let mut failures = String::new();
        for func in overloads {
            match func.invoke(&argv) {
                Ok(value) => return Ok(value),
                Err(reason) => {
                    failures.push_str(&format!("\n({name}, {}): {reason}", func.arity()));
                }
            }
        }

        Err(self.error_at(
            pos,
            context,
            ExecErrorKind::CallFailed {
                name: name.to_string(),
                details: failures,
            },
        ))
    }

    /// The zeroth argument is the function name itself and is skipped;
    /// the preceding pipeline stage's value is appended when present
    fn eval_call_args(
        &mut self,
        dot: &Value,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
    ) -> Result<Vec<Value>, ExecError> {
        let mut argv = vec![];
        if let Some(args) = args {
            for arg in &args[1..] {
                argv.push(self.eval_arg(dot, arg)?);
            }
        }
        if let Some(final_val) = final_val {
            argv.push(final_val.clone());
        }

        Ok(argv)
    }

    fn assert_not_a_function(
        &self,
        args: Option<&[Node]>,
        final_val: Option<&Value>,
        pos: usize,
        context: &dyn fmt::Display,
    ) -> Result<(), ExecError> {
        if args.is_some_and(|a| a.len() > 1) || final_val.is_some() {
            return Err(self.error_at(
                pos,
                context,
                ExecErrorKind::NotAFunction(context.to_string()),
            ));
        }

        Ok(())
    }

    fn print_value(&mut self, value: &Value, node: &ActionNode) -> Result<(), ExecError> {
        write!(self.writer, "{value}")
            .map_err(|e| self.error_at(node.pos, node, ExecErrorKind::Write(e.to_string())))
    }
}

/// The value of a number literal in a context where the type is not
/// known; the spelling decides
fn constant(number: &NumberNode) -> Value {
    if number.prefers_float() {
        return Value::Float(number.float);
    }
    match number.int {
        Some(i) => Value::Int(i64::from(i)),
        None => Value::Float(number.float),
    }
}
