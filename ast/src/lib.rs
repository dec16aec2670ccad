//! Parse-tree nodes for template sources.
//!
//! Every node records the byte offset of its first character in the
//! source it was parsed from; error positions are recomputed from that
//! offset and the owning tree's retained source text. `Display` renders
//! the node back in template syntax, which is also what error messages
//! quote.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element in the parse tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Plain text to emit verbatim
    Text(TextNode),
    /// A sequence of nodes; the root of every parsed template
    Sequence(SequenceNode),
    /// A non-control action such as a field evaluation
    Action(ActionNode),
    /// A pipeline of commands with optional leading variables
    Pipe(PipeNode),
    /// One stage of a pipeline
    Command(CommandNode),
    /// An identifier; always a function name
    Identifier(IdentifierNode),
    /// The cursor, dot
    Dot(DotNode),
    Null(NullNode),
    /// A field chain (`.a.b`); the dots are dropped from the segments
    Field(FieldNode),
    /// A variable reference (`$x` or `$x.a.b`)
    Variable(VariableNode),
    /// A term followed by field accesses
    Chain(ChainNode),
    Bool(BoolNode),
    Number(NumberNode),
    Str(StringNode),
    If(BranchNode),
    For(BranchNode),
    With(BranchNode),
    Break(BreakNode),
    Continue(ContinueNode),
    /// A template invocation action
    Template(TemplateNode),
    /// An `end` action; never part of a finalised tree
    End(EndNode),
    /// An `else` action; never part of a finalised tree
    Else(ElseNode),
}

impl Node {
    pub fn pos(&self) -> usize {
        match self {
            Node::Text(n) => n.pos,
            Node::Sequence(n) => n.pos,
            Node::Action(n) => n.pos,
            Node::Pipe(n) => n.pos,
            Node::Command(n) => n.pos,
            Node::Identifier(n) => n.pos,
            Node::Dot(n) => n.pos,
            Node::Null(n) => n.pos,
            Node::Field(n) => n.pos,
            Node::Variable(n) => n.pos,
            Node::Chain(n) => n.pos,
            Node::Bool(n) => n.pos,
            Node::Number(n) => n.pos,
            Node::Str(n) => n.pos,
            Node::If(n) | Node::For(n) | Node::With(n) => n.pos,
            Node::Break(n) => n.pos,
            Node::Continue(n) => n.pos,
            Node::Template(n) => n.pos,
            Node::End(n) => n.pos,
            Node::Else(n) => n.pos,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(n) => n.fmt(f),
            Node::Sequence(n) => n.fmt(f),
            Node::Action(n) => n.fmt(f),
            Node::Pipe(n) => n.fmt(f),
            Node::Command(n) => n.fmt(f),
            Node::Identifier(n) => n.fmt(f),
            Node::Dot(n) => n.fmt(f),
            Node::Null(n) => n.fmt(f),
            Node::Field(n) => n.fmt(f),
            Node::Variable(n) => n.fmt(f),
            Node::Chain(n) => n.fmt(f),
            Node::Bool(n) => n.fmt(f),
            Node::Number(n) => n.fmt(f),
            Node::Str(n) => n.fmt(f),
            Node::If(n) => n.fmt_named(f, "if"),
            Node::For(n) => n.fmt_named(f, "for"),
            Node::With(n) => n.fmt_named(f, "with"),
            Node::Break(n) => n.fmt(f),
            Node::Continue(n) => n.fmt(f),
            Node::Template(n) => n.fmt(f),
            Node::End(n) => n.fmt(f),
            Node::Else(n) => n.fmt(f),
        }
    }
}

/// Holds plain text; may span newlines
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub pos: usize,
    pub text: String,
}

impl fmt::Display for TextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Holds a sequence of nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceNode {
    pub pos: usize,
    pub nodes: Vec<Node>,
}

impl SequenceNode {
    pub fn new(pos: usize) -> Self {
        Self { pos, nodes: vec![] }
    }

    pub fn append(&mut self, node: Node) {
        self.nodes.push(node);
    }
}

impl fmt::Display for SequenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            node.fmt(f)?;
        }
        Ok(())
    }
}

/// Holds an action bounded by delimiters. Control actions have their own
/// nodes; this represents simple ones such as field evaluations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub pos: usize,
    pub pipe: PipeNode,
}

impl fmt::Display for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.pipe)
    }
}

/// Holds a pipeline with an optional leading variable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipeNode {
    pub pos: usize,
    /// The variables are being declared, not assigned
    pub decl: bool,
    /// Variables in lexical order
    pub vars: Vec<VariableNode>,
    /// The commands in lexical order
    pub cmds: Vec<CommandNode>,
}

impl PipeNode {
    pub fn new(pos: usize, vars: Vec<VariableNode>) -> Self {
        Self {
            pos,
            decl: false,
            vars,
            cmds: vec![],
        }
    }

    pub fn append(&mut self, cmd: CommandNode) {
        self.cmds.push(cmd);
    }
}

impl fmt::Display for PipeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vars.len() == 1 {
            write!(f, "{} := ", self.vars[0])?;
        }
        for (i, cmd) in self.cmds.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            cmd.fmt(f)?;
        }
        Ok(())
    }
}

/// Holds a command: the arguments of one pipeline stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandNode {
    pub pos: usize,
    /// Arguments in lexical order: identifier, field, or constant
    pub args: Vec<Node>,
}

impl CommandNode {
    pub fn new(pos: usize) -> Self {
        Self { pos, args: vec![] }
    }

    pub fn append(&mut self, node: Node) {
        self.args.push(node);
    }
}

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match arg {
                Node::Pipe(pipe) => write!(f, "({pipe})")?,
                _ => arg.fmt(f)?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentifierNode {
    pub pos: usize,
    pub ident: String,
}

impl fmt::Display for IdentifierNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ident)
    }
}

/// Holds the special identifier `.`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DotNode {
    pub pos: usize,
}

impl fmt::Display for DotNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NullNode {
    pub pos: usize,
}

impl fmt::Display for NullNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "null")
    }
}

/// Holds a field chain (`.x.y`); the dot is dropped from each segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub pos: usize,
    pub ident: Vec<String>,
}

impl fmt::Display for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.ident {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// Holds a variable name, possibly with chained field accesses. The
/// dollar sign is part of the first segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableNode {
    pub pos: usize,
    pub ident: Vec<String>,
}

impl fmt::Display for VariableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.ident.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Holds a term followed by a chain of field accesses; the dots are
/// dropped from the stored segments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    pub pos: usize,
    pub node: Box<Node>,
    pub field: Vec<String>,
}

impl ChainNode {
    pub fn new(pos: usize, node: Node) -> Self {
        Self {
            pos,
            node: Box::new(node),
            field: vec![],
        }
    }

    /// Adds the named field, without its leading dot, to the chain
    pub fn add(&mut self, field: impl Into<String>) {
        self.field.push(field.into());
    }
}

impl fmt::Display for ChainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.as_ref() {
            Node::Pipe(pipe) => write!(f, "({pipe})")?,
            node => node.fmt(f)?,
        }
        for field in &self.field {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoolNode {
    pub pos: usize,
    pub val: bool,
}

impl fmt::Display for BoolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.val { "true" } else { "false" })
    }
}

/// Holds a number: integer or float.
///
/// The float view is always populated for a validly parsed number; the
/// int view exists when the literal is representable in a 32-bit signed
/// integer (`int` implies the float view equals it).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumberNode {
    pub pos: usize,
    /// The original textual representation from the input
    pub text: String,
    pub int: Option<i32>,
    pub float: f64,
}

impl NumberNode {
    /// Whether the literal's spelling asks for the float view: it has a
    /// fraction or exponent and is neither hex nor a character constant
    pub fn prefers_float(&self) -> bool {
        if self.text.starts_with('\'') || is_hex_constant(&self.text) {
            return false;
        }
        self.text.contains(['.', 'e', 'E'])
    }
}

impl fmt::Display for NumberNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

pub fn is_hex_constant(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    digits.len() > 2 && digits.starts_with('0') && matches!(digits.as_bytes()[1], b'x' | b'X')
}

/// Holds a string constant; the value has been unquoted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StringNode {
    pub pos: usize,
    /// The original text of the string, with quotes
    pub quoted: String,
    /// The string after quote processing
    pub text: String,
}

impl fmt::Display for StringNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quoted)
    }
}

/// The common representation of `if`, `for` and `with`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub pos: usize,
    /// The pipeline to be evaluated
    pub pipe: PipeNode,
    /// What to execute if the value is non-empty
    pub list: SequenceNode,
    /// What to execute if the value is empty (absent if not present)
    pub else_list: Option<SequenceNode>,
}

impl BranchNode {
    fn fmt_named(&self, f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
        match &self.else_list {
            Some(else_list) => write!(
                f,
                "{{{{{name} {}}}}}{}{{{{else}}}}{}{{{{end}}}}",
                self.pipe, self.list, else_list
            ),
            None => write!(f, "{{{{{name} {}}}}}{}{{{{end}}}}", self.pipe, self.list),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakNode {
    pub pos: usize,
}

impl fmt::Display for BreakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{break}}}}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContinueNode {
    pub pos: usize,
}

impl fmt::Display for ContinueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{continue}}}}")
    }
}

/// Represents a `{{template}}` invocation action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub pos: usize,
    /// The name of the invoked template, unquoted
    pub name: String,
    /// The pipeline whose value becomes dot inside the invocation
    pub pipe: Option<PipeNode>,
}

impl fmt::Display for TemplateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pipe {
            Some(pipe) => write!(f, "{{{{template \"{}\" {}}}}}", self.name, pipe),
            None => write!(f, "{{{{template \"{}\"}}}}", self.name),
        }
    }
}

/// Represents an `{{end}}` action; only seen while parsing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndNode {
    pub pos: usize,
}

impl fmt::Display for EndNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{end}}}}")
    }
}

/// Represents an `{{else}}` action; only seen while parsing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElseNode {
    pub pos: usize,
}

impl fmt::Display for ElseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{else}}}}")
    }
}
