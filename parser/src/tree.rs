//! Recursive-descent template parser.
//!
//! [`Tree::parse`] turns one template source into a set of named trees:
//! the top-level template plus every `{{define}}` clause it contains.
//! Parsing state (lexer, lookahead buffer, declared variables, loop
//! depth) lives in the private [`Parser`] and is dropped when parsing
//! finishes, leaving pure trees behind.

use std::collections::{HashMap, HashSet};
use std::mem;

use ast::{
    ActionNode, BoolNode, BranchNode, BreakNode, ChainNode, CommandNode, ContinueNode, DotNode,
    ElseNode, EndNode, FieldNode, IdentifierNode, Node, NullNode, NumberNode, PipeNode,
    SequenceNode, StringNode, TemplateNode, TextNode, VariableNode,
};
use errors::{ParseError, ParseErrorKind};
use lexer::Lexer;
use serde::{Deserialize, Serialize};
use token::{Token, TokenKind};

use crate::unquote::{unquote, unquote_char};

/// Representation of a single parsed template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Template name
    pub name: String,
    /// Name of the top-level template during parsing, for error messages
    pub parse_name: String,
    /// Top-level root of the tree
    pub root: Option<SequenceNode>,
    /// Text parsed to create the template (or its parent)
    pub text: String,
}

impl Tree {
    /// Parse `text` as a template named `name`, returning every tree the
    /// source defines keyed by name. `funcs` holds the sets of function
    /// names that identifiers may legally reference.
    pub fn parse(
        name: &str,
        text: &str,
        left_delim: Option<&str>,
        right_delim: Option<&str>,
        funcs: &[&HashSet<String>],
    ) -> Result<HashMap<String, Tree>, ParseError> {
        let mut tree_set = HashMap::new();
        let mut parser = Parser {
            lex: Lexer::new(text, left_delim, right_delim),
            token: [Token::eof(0, 1), Token::eof(0, 1), Token::eof(0, 1)],
            peek_count: 0,
            vars: vec!["$".to_string()],
            for_depth: 0,
            funcs,
            parse_name: name.to_string(),
            text,
            tree_set: &mut tree_set,
        };
        parser.parse_root(name)?;

        Ok(tree_set)
    }

    /// Reports whether this tree is empty of everything but space
    pub fn is_empty(&self) -> bool {
        match &self.root {
            None => true,
            Some(root) => root.nodes.iter().all(node_is_empty),
        }
    }

    /// One-based (line, column) of a byte offset into this tree's source
    pub fn location_of(&self, pos: usize) -> (usize, usize) {
        let (line, column) = span::index_to_position(&self.text, pos);

        (line + 1, column + 1)
    }

    /// Rendering of a node for error messages, clipped to 20 characters
    pub fn error_context(node: &dyn std::fmt::Display) -> String {
        let context = node.to_string();
        if context.chars().count() > 20 {
            let head: String = context.chars().take(20).collect();
            return format!("{head}...");
        }

        context
    }
}

fn node_is_empty(node: &Node) -> bool {
    match node {
        Node::Text(text) => text.text.trim().is_empty(),
        Node::Sequence(list) => list.nodes.iter().all(node_is_empty),
        _ => false,
    }
}

struct Parser<'a> {
    lex: Lexer,
    /// Three-token lookahead buffer
    token: [Token; 3],
    peek_count: usize,
    /// Variables known to be in scope at this point of the parse
    vars: Vec<String>,
    /// Nesting level of for loops
    for_depth: usize,
    funcs: &'a [&'a HashSet<String>],
    parse_name: String,
    text: &'a str,
    tree_set: &'a mut HashMap<String, Tree>,
}

impl<'a> Parser<'a> {
    // ---- token stream plumbing ----

    fn next(&mut self) -> Token {
        if self.peek_count > 0 {
            self.peek_count -= 1;
        } else {
            self.token[0] = self.lex.next_token();
        }

        self.token[self.peek_count].clone()
    }

    /// Backs the input stream up one token
    fn backup(&mut self) {
        self.peek_count += 1;
    }

    /// Backs the input stream up two tokens; the zeroth is already there
    fn backup2(&mut self, t0: Token) {
        self.token[1] = t0;
        self.peek_count = 2;
    }

    /// Backs the input stream up three tokens; the zeroth is already
    /// there. Arguments arrive in reverse order because we are pushing
    /// back
    fn backup3(&mut self, t2: Token, t1: Token) {
        self.token[1] = t1;
        self.token[2] = t2;
        self.peek_count = 3;
    }

    /// Returns but does not consume the next token
    fn peek(&mut self) -> Token {
        if self.peek_count > 0 {
            return self.token[self.peek_count - 1].clone();
        }
        self.peek_count = 1;
        self.token[0] = self.lex.next_token();

        self.token[0].clone()
    }

    fn next_non_space(&mut self) -> Token {
        loop {
            let token = self.next();
            if token.kind != TokenKind::Space {
                return token;
            }
        }
    }

    fn peek_non_space(&mut self) -> Token {
        let token = self.next_non_space();
        self.backup();

        token
    }

    /// Consumes the next token and guarantees it has the required kind
    fn expect(&mut self, expected: TokenKind, context: &str) -> Result<Token, ParseError> {
        let token = self.next_non_space();
        if token.kind == TokenKind::Error {
            return Err(self.lex_error(&token));
        }
        if token.kind != expected {
            return Err(self.unexpected(&token, context));
        }

        Ok(token)
    }

    /// Consumes the next token and guarantees it has one of the required kinds
    fn expect_one_of(
        &mut self,
        expected1: TokenKind,
        expected2: TokenKind,
        context: &str,
    ) -> Result<Token, ParseError> {
        let token = self.next_non_space();
        if token.kind == TokenKind::Error {
            return Err(self.lex_error(&token));
        }
        if token.kind != expected1 && token.kind != expected2 {
            return Err(self.unexpected(&token, context));
        }

        Ok(token)
    }

    // ---- error construction ----

    fn error_at(&self, token: &Token, kind: ParseErrorKind) -> ParseError {
        let (_, column) = span::index_to_position(self.text, token.pos);
        let width = if token.kind == TokenKind::Error {
            0
        } else {
            token.val.len()
        };

        ParseError {
            kind,
            parse_name: self.parse_name.clone(),
            line: token.line,
            column: column + 1,
            span: token.pos..token.pos + width,
        }
    }

    /// Error positioned at the most recently read token
    fn error(&self, kind: ParseErrorKind) -> ParseError {
        let token = self.token[0].clone();

        self.error_at(&token, kind)
    }

    fn unexpected(&self, token: &Token, context: &str) -> ParseError {
        self.error_at(
            &token.clone(),
            ParseErrorKind::Unexpected {
                token: token.to_string(),
                context: context.to_string(),
            },
        )
    }

    fn lex_error(&self, token: &Token) -> ParseError {
        self.error_at(token, ParseErrorKind::Lex(token.val.clone()))
    }

    // ---- scope helpers ----

    fn has_function(&self, name: &str) -> bool {
        self.funcs.iter().any(|set| set.contains(name))
    }

    /// Returns a node for a variable reference, erroring if the variable
    /// is not defined
    fn use_var(&mut self, pos: usize, name: &str) -> Result<VariableNode, ParseError> {
        let var = self.new_variable(pos, name)?;
        if self.vars.iter().any(|known| known == &var.ident[0]) {
            return Ok(var);
        }

        Err(self.error(ParseErrorKind::UndefinedVariable(name.to_string())))
    }

    // ---- grammar ----

    /// template : ( text | action )* EOF
    fn parse_root(&mut self, name: &str) -> Result<(), ParseError> {
        let mut root = SequenceNode::new(self.peek().pos);
        while self.peek().kind != TokenKind::Eof {
            if self.peek().kind == TokenKind::LeftDelim {
                let delim = self.next();
                if self.next_non_space().kind == TokenKind::Define {
                    self.parse_definition()?;
                    continue;
                }
                self.backup2(delim);
            }
            let node = self.text_or_action()?;
            match node {
                Node::End(_) | Node::Else(_) => {
                    return Err(self.error(ParseErrorKind::UnexpectedNode(node.to_string())))
                }
                node => root.append(node),
            }
        }

        let tree = Tree {
            name: name.to_string(),
            parse_name: self.parse_name.clone(),
            root: Some(root),
            text: self.text.to_string(),
        };
        self.add_tree(tree)
    }

    /// Adds a finished tree to the set being built, under the rule that a
    /// later empty definition never replaces a prior non-empty one
    fn add_tree(&mut self, tree: Tree) -> Result<(), ParseError> {
        match self.tree_set.get(&tree.name) {
            Some(old) if !old.is_empty() => {
                if tree.is_empty() {
                    return Ok(());
                }
                Err(self.error(ParseErrorKind::MultipleDefinition(tree.name.clone())))
            }
            _ => {
                self.tree_set.insert(tree.name.clone(), tree);
                Ok(())
            }
        }
    }

    /// Parses a `{{define}}` ... `{{end}}` template definition and
    /// installs it in the tree set. The `define` keyword is already
    /// consumed
    fn parse_definition(&mut self) -> Result<(), ParseError> {
        let context = "define clause";
        let name_token =
            self.expect_one_of(TokenKind::String, TokenKind::RawString, context)?;
        let name = unquote(&name_token.val).map_err(|kind| self.error_at(&name_token, kind))?;
        self.expect(TokenKind::RightDelim, context)?;

        // the definition body has its own variable scope
        let saved_vars = mem::replace(&mut self.vars, vec!["$".to_string()]);
        let saved_for_depth = mem::take(&mut self.for_depth);
        let result = self.item_list();
        self.vars = saved_vars;
        self.for_depth = saved_for_depth;

        let (list, end) = result?;
        if !matches!(end, Node::End(_)) {
            return Err(self.error(ParseErrorKind::Unexpected {
                token: end.to_string(),
                context: context.to_string(),
            }));
        }

        let tree = Tree {
            name,
            parse_name: self.parse_name.clone(),
            root: Some(list),
            text: self.text.to_string(),
        };
        self.add_tree(tree)
    }

    /// itemList : textOrAction*
    ///
    /// Terminates at `{{end}}` or `{{else}}`, returned separately
    fn item_list(&mut self) -> Result<(SequenceNode, Node), ParseError> {
        let mut list = SequenceNode::new(self.peek_non_space().pos);
        while self.peek_non_space().kind != TokenKind::Eof {
            let node = self.text_or_action()?;
            match node {
                Node::End(_) | Node::Else(_) => return Ok((list, node)),
                node => list.append(node),
            }
        }

        Err(self.error(ParseErrorKind::UnexpectedEof))
    }

    /// textOrAction : text | action
    fn text_or_action(&mut self) -> Result<Node, ParseError> {
        let token = self.next_non_space();
        match token.kind {
            TokenKind::Text => Ok(Node::Text(TextNode {
                pos: token.pos,
                text: token.val,
            })),
            TokenKind::LeftDelim => self.action(),
            TokenKind::Error => Err(self.lex_error(&token)),
            _ => Err(self.unexpected(&token, "input")),
        }
    }

    /// action : control | pipeline
    ///
    /// The left delimiter is already consumed; the first word may be a
    /// keyword
    fn action(&mut self) -> Result<Node, ParseError> {
        let token = self.next_non_space();
        match token.kind {
            TokenKind::Else => return self.else_control(),
            TokenKind::End => return self.end_control(),
            TokenKind::If => return self.if_control(),
            TokenKind::For => return self.for_control(),
            TokenKind::Template => return self.template_control(),
            TokenKind::With => return self.with_control(),
            TokenKind::Break => return self.break_control(),
            TokenKind::Continue => return self.continue_control(),
            _ => {}
        }
        self.backup();
        let pos = self.peek().pos;

        // variables persist until the surrounding block ends
        let pipe = self.pipeline("command")?;
        Ok(Node::Action(ActionNode { pos, pipe }))
    }

    /// pipeline : declaration? command ('|' command)*
    fn pipeline(&mut self, context: &str) -> Result<PipeNode, ParseError> {
        let mut vars = vec![];
        let mut decl = false;
        let pos = self.peek_non_space().pos;

        let v = self.peek_non_space();
        if v.kind == TokenKind::Variable {
            self.next();
            // Since space is a token, three-token lookahead is needed
            // here in the worst case: in "$x foo" we must read "foo"
            // (as opposed to "=") to know $x is an argument rather than
            // a declaration.
            let token_after_variable = self.peek();
            let next = self.peek_non_space();
            if next.kind == TokenKind::Assign || next.kind == TokenKind::Declare {
                self.next_non_space();
                vars.push(self.new_variable(v.pos, &v.val)?);
                self.vars.push(v.val.clone());
                decl = next.kind == TokenKind::Declare;
            } else if token_after_variable.kind == TokenKind::Space {
                self.backup3(v, token_after_variable);
            } else {
                self.backup2(v);
            }
        }

        let mut pipe = PipeNode::new(pos, vars);
        pipe.decl = decl;
        loop {
            let token = self.next_non_space();
            match token.kind {
                TokenKind::RightDelim | TokenKind::RightParen => {
                    self.check_pipeline(&pipe, context)?;
                    if token.kind == TokenKind::RightParen {
                        self.backup();
                    }
                    return Ok(pipe);
                }
                TokenKind::Bool
                | TokenKind::CharConstant
                | TokenKind::Dot
                | TokenKind::Field
                | TokenKind::Identifier
                | TokenKind::Number
                | TokenKind::Null
                | TokenKind::String
                | TokenKind::RawString
                | TokenKind::Variable
                | TokenKind::LeftParen => {
                    self.backup();
                    let cmd = self.command()?;
                    pipe.append(cmd);
                }
                TokenKind::Error => return Err(self.lex_error(&token)),
                _ => return Err(self.unexpected(&token, context)),
            }
        }
    }

    fn check_pipeline(&mut self, pipe: &PipeNode, context: &str) -> Result<(), ParseError> {
        // reject empty pipelines
        if pipe.cmds.is_empty() {
            return Err(self.error(ParseErrorKind::MissingValue(context.to_string())));
        }
        // only the first command of a pipeline may start with a
        // non-executable operand
        for (i, cmd) in pipe.cmds.iter().enumerate().skip(1) {
            match cmd.args[0] {
                Node::Bool(_)
                | Node::Dot(_)
                | Node::Null(_)
                | Node::Number(_)
                | Node::Str(_) => {
                    return Err(self.error(ParseErrorKind::NonExecutableCommand(i + 1)));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// command : operand (space operand)*
    ///
    /// Space-separated arguments up to a pipe character or right
    /// delimiter. The pipe is consumed; the right delimiter is left to
    /// terminate the action
    fn command(&mut self) -> Result<CommandNode, ParseError> {
        let mut cmd = CommandNode::new(self.peek_non_space().pos);
        loop {
            self.peek_non_space(); // skip leading spaces
            if let Some(operand) = self.operand()? {
                cmd.append(operand);
            }
            let token = self.next();
            match token.kind {
                TokenKind::Space => continue,
                TokenKind::Error => return Err(self.lex_error(&token)),
                TokenKind::RightDelim | TokenKind::RightParen => self.backup(),
                TokenKind::Pipe => {}
                _ => return Err(self.unexpected(&token, "operand")),
            }
            break;
        }
        if cmd.args.is_empty() {
            return Err(self.error(ParseErrorKind::EmptyCommand));
        }

        Ok(cmd)
    }

    /// operand : term .field*
    ///
    /// An operand is a space-separated component of a command: a term
    /// possibly followed by field accesses. `None` means the next token
    /// is not an operand
    fn operand(&mut self) -> Result<Option<Node>, ParseError> {
        let node = match self.term()? {
            None => return Ok(None),
            Some(node) => node,
        };
        if self.peek().kind != TokenKind::Field {
            return Ok(Some(node));
        }

        let mut chain = ChainNode::new(self.peek().pos, node);
        while self.peek().kind == TokenKind::Field {
            let field = self.next();
            chain.add(&field.val[1..]);
        }
        // obvious errors involving literal heads are detected here; the
        // rest surface at execution time
        let combined = match chain.node.as_ref() {
            Node::Field(_) => Node::Field(self.new_field(chain.pos, &chain.to_string())),
            Node::Variable(_) => {
                Node::Variable(self.new_variable(chain.pos, &chain.to_string())?)
            }
            Node::Bool(_) | Node::Null(_) | Node::Number(_) | Node::Dot(_) => {
                return Err(
                    self.error(ParseErrorKind::DotAfterTerm(chain.node.to_string()))
                );
            }
            _ => Node::Chain(chain),
        };

        Ok(Some(combined))
    }

    /// term : literal | function | dot | field | variable | '(' pipeline ')'
    ///
    /// A term is a simple expression. `None` means the next token is not
    /// a term
    fn term(&mut self) -> Result<Option<Node>, ParseError> {
        let token = self.next_non_space();
        match token.kind {
            TokenKind::Error => Err(self.lex_error(&token)),
            TokenKind::Identifier => {
                if !self.has_function(&token.val) {
                    return Err(
                        self.error_at(&token, ParseErrorKind::UndefinedFunction(token.val.clone()))
                    );
                }
                Ok(Some(Node::Identifier(IdentifierNode {
                    pos: token.pos,
                    ident: token.val,
                })))
            }
            TokenKind::Dot => Ok(Some(Node::Dot(DotNode { pos: token.pos }))),
            TokenKind::Null => Ok(Some(Node::Null(NullNode { pos: token.pos }))),
            TokenKind::Variable => Ok(Some(Node::Variable(self.use_var(token.pos, &token.val)?))),
            TokenKind::Field => Ok(Some(Node::Field(self.new_field(token.pos, &token.val)))),
            TokenKind::Bool => Ok(Some(Node::Bool(BoolNode {
                pos: token.pos,
                val: token.val == "true",
            }))),
            TokenKind::CharConstant | TokenKind::Number => Ok(Some(Node::Number(
                self.new_number(token.pos, &token.val, token.kind)?,
            ))),
            TokenKind::LeftParen => {
                let pipe = self.pipeline("parenthesized pipeline")?;
                let next = self.next();
                if next.kind != TokenKind::RightParen {
                    return Err(
                        self.error_at(&next, ParseErrorKind::UnclosedParen(next.to_string()))
                    );
                }
                Ok(Some(Node::Pipe(pipe)))
            }
            TokenKind::String | TokenKind::RawString => {
                let text = unquote(&token.val).map_err(|kind| self.error_at(&token, kind))?;
                Ok(Some(Node::Str(StringNode {
                    pos: token.pos,
                    quoted: token.val,
                    text,
                })))
            }
            _ => {
                self.backup();
                Ok(None)
            }
        }
    }

    /// else : `{{else}}`
    fn else_control(&mut self) -> Result<Node, ParseError> {
        // special case for "else if": leave the if token pending
        let peek = self.peek_non_space();
        if peek.kind == TokenKind::If {
            return Ok(Node::Else(ElseNode { pos: peek.pos }));
        }
        let token = self.expect(TokenKind::RightDelim, "else")?;

        Ok(Node::Else(ElseNode { pos: token.pos }))
    }

    /// end : `{{end}}`
    fn end_control(&mut self) -> Result<Node, ParseError> {
        let token = self.expect(TokenKind::RightDelim, "end")?;

        Ok(Node::End(EndNode { pos: token.pos }))
    }

    /// template : `{{template stringValue pipeline?}}`
    ///
    /// The name must be a string constant
    fn template_control(&mut self) -> Result<Node, ParseError> {
        let context = "template clause";
        let token = self.next_non_space();
        let name = self.parse_template_name(&token, context)?;
        let pipe = if self.next_non_space().kind != TokenKind::RightDelim {
            self.backup();
            // variables are not popped; they persist until "end"
            Some(self.pipeline(context)?)
        } else {
            None
        };

        Ok(Node::Template(TemplateNode {
            pos: token.pos,
            name,
            pipe,
        }))
    }

    fn parse_template_name(&mut self, token: &Token, context: &str) -> Result<String, ParseError> {
        match token.kind {
            TokenKind::String | TokenKind::RawString => {
                unquote(&token.val).map_err(|kind| self.error_at(token, kind))
            }
            _ => Err(self.unexpected(token, context)),
        }
    }

    /// if : `{{if pipeline}}` itemList (`{{else}}` itemList)? `{{end}}`
    fn if_control(&mut self) -> Result<Node, ParseError> {
        let (pos, pipe, list, else_list) = self.parse_control(true, "if")?;

        Ok(Node::If(BranchNode {
            pos,
            pipe,
            list,
            else_list,
        }))
    }

    /// for : `{{for pipeline}}` itemList (`{{else}}` itemList)? `{{end}}`
    fn for_control(&mut self) -> Result<Node, ParseError> {
        let (pos, pipe, list, else_list) = self.parse_control(false, "for")?;

        Ok(Node::For(BranchNode {
            pos,
            pipe,
            list,
            else_list,
        }))
    }

    /// with : `{{with pipeline}}` itemList (`{{else}}` itemList)? `{{end}}`
    fn with_control(&mut self) -> Result<Node, ParseError> {
        let (pos, pipe, list, else_list) = self.parse_control(false, "with")?;

        Ok(Node::With(BranchNode {
            pos,
            pipe,
            list,
            else_list,
        }))
    }

    /// break : `{{break}}`
    fn break_control(&mut self) -> Result<Node, ParseError> {
        if self.for_depth == 0 {
            return Err(self.error(ParseErrorKind::LoopControlOutsideFor("break".to_string())));
        }
        let token = self.expect(TokenKind::RightDelim, "break")?;

        Ok(Node::Break(BreakNode { pos: token.pos }))
    }

    /// continue : `{{continue}}`
    fn continue_control(&mut self) -> Result<Node, ParseError> {
        if self.for_depth == 0 {
            return Err(self.error(ParseErrorKind::LoopControlOutsideFor("continue".to_string())));
        }
        let token = self.expect(TokenKind::RightDelim, "continue")?;

        Ok(Node::Continue(ContinueNode { pos: token.pos }))
    }

    #[allow(clippy::type_complexity)]
    fn parse_control(
        &mut self,
        allow_else_if: bool,
        context: &'static str,
    ) -> Result<(usize, PipeNode, SequenceNode, Option<SequenceNode>), ParseError> {
        let vars_len = self.vars.len();
        let result = self.parse_control_inner(allow_else_if, context);
        self.vars.truncate(vars_len);

        result
    }

    #[allow(clippy::type_complexity)]
    fn parse_control_inner(
        &mut self,
        allow_else_if: bool,
        context: &'static str,
    ) -> Result<(usize, PipeNode, SequenceNode, Option<SequenceNode>), ParseError> {
        let pipe = self.pipeline(context)?;
        if context == "for" {
            self.for_depth += 1;
        }
        let listed = self.item_list();
        if context == "for" {
            self.for_depth -= 1;
        }
        let (list, next) = listed?;

        let mut else_list = None;
        if let Node::Else(else_node) = &next {
            if allow_else_if && self.peek().kind == TokenKind::If {
                // Treat {{if a}}...{{else if b}}...{{end}} as
                // {{if a}}...{{else}}{{if b}}...{{end}}{{end}}; the
                // subsequent {{end}} is assumed. This works even for
                // long else-if chains
                self.next();
                let mut nested = SequenceNode::new(else_node.pos);
                nested.append(self.if_control()?);
                else_list = Some(nested);
            } else {
                let (list, end) = self.item_list()?;
                if !matches!(end, Node::End(_)) {
                    return Err(self.error(ParseErrorKind::ExpectedEnd(end.to_string())));
                }
                else_list = Some(list);
            }
        }

        Ok((pipe.pos, pipe, list, else_list))
    }

    // ---- node construction ----

    fn new_field(&self, pos: usize, text: &str) -> FieldNode {
        // drop the leading dot
        let ident = text[1..].split('.').map(str::to_string).collect();

        FieldNode { pos, ident }
    }

    fn new_variable(&mut self, pos: usize, text: &str) -> Result<VariableNode, ParseError> {
        let ident: Vec<String> = text.split('.').map(str::to_string).collect();
        let head_ok = ident[0].starts_with('$');
        if !head_ok || ident.iter().any(|segment| segment.is_empty()) {
            return Err(self.error(ParseErrorKind::BadVariable(text.to_string())));
        }

        Ok(VariableNode { pos, ident })
    }

    fn new_number(
        &mut self,
        pos: usize,
        text: &str,
        kind: TokenKind,
    ) -> Result<NumberNode, ParseError> {
        if kind == TokenKind::CharConstant {
            if !text.starts_with('\'') {
                return Err(self.error(ParseErrorKind::MalformedChar(text.to_string())));
            }
            let (c, tail) = unquote_char(&text[1..], '\'')
                .map_err(|_| self.error(ParseErrorKind::MalformedChar(text.to_string())))?;
            if tail != "'" {
                return Err(self.error(ParseErrorKind::MalformedChar(text.to_string())));
            }
            return Ok(NumberNode {
                pos,
                text: text.to_string(),
                int: Some(c as i32),
                float: (c as u32) as f64,
            });
        }

        let negative = text.starts_with('-');
        let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
        if !negative && unsigned.starts_with('-') {
            return Err(self.error(ParseErrorKind::IllegalNumber(text.to_string())));
        }

        // extract the integer view; 64 bits here so overflow of the
        // 32-bit value range is detectable
        let parsed: Option<i64> = if unsigned.starts_with("0x") || unsigned.starts_with("0X") {
            i64::from_str_radix(&unsigned[2..], 16).ok()
        } else if unsigned.starts_with('0') {
            i64::from_str_radix(unsigned, 8).ok()
        } else {
            unsigned.parse().ok()
        };

        let mut int: Option<i32> = None;
        if let Some(i) = parsed {
            if i > i32::MAX as i64 || i < i32::MIN as i64 {
                return Err(self.error(ParseErrorKind::IntegerOverflow(text.to_string())));
            }
            int = Some(i as i32);
        }

        let float: Option<f64> = match int {
            Some(i) => Some(i as f64),
            None => match unsigned.parse::<f64>() {
                Ok(f) => {
                    // parsed as a float but spelled like an integer: a
                    // number too large for the integer view
                    if !unsigned.contains(['.', 'e', 'E']) {
                        return Err(self.error(ParseErrorKind::IntegerOverflow(text.to_string())));
                    }
                    if (f as i32) as f64 == f {
                        int = Some(f as i32);
                    }
                    Some(f)
                }
                Err(_) => None,
            },
        };

        let Some(float) = float else {
            return Err(self.error(ParseErrorKind::IllegalNumber(text.to_string())));
        };

        let (int, float) = if negative {
            (int.map(|i| -i), -float)
        } else {
            (int, float)
        };

        Ok(NumberNode {
            pos,
            text: text.to_string(),
            int,
            float,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_one(input: &str) -> Result<HashMap<String, Tree>, ParseError> {
        let mut funcs = HashSet::new();
        for name in ["print", "printf", "urlencode", "default"] {
            funcs.insert(name.to_string());
        }
        Tree::parse("test", input, None, None, &[&funcs])
    }

    fn root_string(input: &str) -> String {
        let trees = parse_one(input).expect("parse failed");

        trees["test"].root.as_ref().unwrap().to_string()
    }

    #[test]
    fn parse_plain_text() {
        assert_eq!("hello world", root_string("hello world"));
    }

    #[test]
    fn parse_field_action() {
        assert_eq!("{{.x}}", root_string("{{.x}}"));
        assert_eq!("{{.a.b.c}}", root_string("{{ .a.b.c }}"));
    }

    #[test]
    fn parse_pipeline() {
        assert_eq!("{{.email | urlencode}}", root_string("{{ .email | urlencode }}"));
    }

    #[test]
    fn parse_declaration() {
        assert_eq!("{{$x := 3}}{{$x}}", root_string("{{$x := 3}}{{$x}}"));
    }

    #[test]
    fn parse_variable_argument_needs_three_token_lookahead() {
        // "$x foo" must parse as a command with two arguments, not a
        // declaration
        assert_eq!(
            "{{$x := 3}}{{print $x .y}}",
            root_string("{{$x := 3}}{{print $x .y}}")
        );
    }

    #[test]
    fn parse_control_structures() {
        assert_eq!(
            "{{if .ok}}yes{{else}}no{{end}}",
            root_string("{{if .ok}}yes{{else}}no{{end}}")
        );
        assert_eq!(
            "{{for .items}}x{{end}}",
            root_string("{{for .items}}x{{end}}")
        );
        assert_eq!(
            "{{with .user}}{{.name}}{{end}}",
            root_string("{{with .user}}{{.name}}{{end}}")
        );
    }

    #[test]
    fn parse_else_if_chain() {
        assert_eq!(
            "{{if .a}}1{{else}}{{if .b}}2{{else}}3{{end}}{{end}}",
            root_string("{{if .a}}1{{else if .b}}2{{else}}3{{end}}")
        );
    }

    #[test]
    fn parse_break_and_continue_inside_for() {
        assert_eq!(
            "{{for .items}}{{break}}{{end}}",
            root_string("{{for .items}}{{break}}{{end}}")
        );
        assert_eq!(
            "{{for .items}}{{continue}}{{end}}",
            root_string("{{for .items}}{{continue}}{{end}}")
        );
    }

    #[test]
    fn parse_idempotent_on_rendered_form() {
        let inputs = [
            "a{{.b}}c",
            "{{if .ok}}yes{{end}}",
            "{{$v := .x}}{{$v.field}}",
            "{{printf \"%d\" 23 | urlencode}}",
            "{{for .items}}{{if .done}}{{break}}{{end}}{{end}}",
        ];
        for input in inputs {
            let rendered = root_string(input);

            assert_eq!(rendered, root_string(&rendered));
        }
    }

    #[test]
    fn parse_define_installs_trees() {
        let trees =
            parse_one("{{define \"foo\"}} FOO {{end}}{{define \"bar\"}} BAR {{end}}").unwrap();

        assert_eq!(3, trees.len());
        assert_eq!(" FOO ", trees["foo"].root.as_ref().unwrap().to_string());
        assert_eq!(" BAR ", trees["bar"].root.as_ref().unwrap().to_string());
    }

    #[test]
    fn parse_empty_definition_keeps_earlier_body() {
        let trees =
            parse_one("{{define \"foo\"}} FOO {{end}}{{define \"foo\"}} {{end}}").unwrap();

        assert_eq!(" FOO ", trees["foo"].root.as_ref().unwrap().to_string());
    }

    #[test]
    fn parse_duplicate_definition_errors() {
        let err = parse_one("{{define \"foo\"}}a{{end}}{{define \"foo\"}}b{{end}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::MultipleDefinition("foo".to_string()),
            err.kind
        );
    }

    #[test]
    fn parse_unterminated_define_reports_eof() {
        let err = parse_one("{{define \"foo\"}} FOO ").unwrap_err();

        assert_eq!(ParseErrorKind::UnexpectedEof, err.kind);
        assert_eq!("test", err.parse_name);
        assert_eq!(1, err.line);
    }

    #[test]
    fn parse_malformed_define_name() {
        let err = parse_one("{{define \"foo}} FOO ").unwrap_err();

        assert!(matches!(err.kind, ParseErrorKind::Lex(_)));
    }

    #[test]
    fn parse_undefined_function() {
        let err = parse_one("{{shout .x}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::UndefinedFunction("shout".to_string()),
            err.kind
        );
        assert_eq!("test:1:3: function 'shout' not defined", err.to_string());
    }

    #[test]
    fn parse_undefined_variable() {
        let err = parse_one("{{$x}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::UndefinedVariable("$x".to_string()),
            err.kind
        );
    }

    #[test]
    fn parse_variable_out_of_scope_after_end() {
        let err = parse_one("{{if .ok}}{{$x := 1}}{{end}}{{$x}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::UndefinedVariable("$x".to_string()),
            err.kind
        );
    }

    #[test]
    fn parse_break_outside_for() {
        let err = parse_one("{{break}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::LoopControlOutsideFor("break".to_string()),
            err.kind
        );
    }

    #[test]
    fn parse_non_executable_pipeline_stage() {
        let err = parse_one("{{.x | 3}}").unwrap_err();

        assert_eq!(ParseErrorKind::NonExecutableCommand(2), err.kind);
    }

    #[test]
    fn parse_number_views() {
        let trees = parse_one("{{print 7 2.0 1e3 0x10 011 'a' -5}}").unwrap();
        let root = trees["test"].root.as_ref().unwrap();
        let Node::Action(action) = &root.nodes[0] else {
            panic!("expected action");
        };
        let numbers: Vec<&NumberNode> = action.pipe.cmds[0]
            .args
            .iter()
            .filter_map(|arg| match arg {
                Node::Number(n) => Some(n),
                _ => None,
            })
            .collect();

        assert_eq!(Some(7), numbers[0].int);
        assert_eq!(Some(2), numbers[1].int);
        assert_eq!(2.0, numbers[1].float);
        assert!(numbers[1].prefers_float());
        assert_eq!(Some(1000), numbers[2].int);
        assert!(numbers[2].prefers_float());
        assert_eq!(Some(16), numbers[3].int);
        assert_eq!(Some(9), numbers[4].int);
        assert_eq!(Some(97), numbers[5].int);
        assert_eq!(Some(-5), numbers[6].int);
    }

    #[test]
    fn parse_integer_overflow() {
        let err = parse_one("{{print 4294967296}}").unwrap_err();

        assert_eq!(
            ParseErrorKind::IntegerOverflow("4294967296".to_string()),
            err.kind
        );
    }

    #[test]
    fn parse_dot_after_literal_is_rejected() {
        let err = parse_one("{{true.x}}").unwrap_err();

        assert_eq!(ParseErrorKind::DotAfterTerm("true".to_string()), err.kind);
    }

    #[test]
    fn parse_error_positions_count_lines() {
        let err = parse_one("line one\nline two\n{{shout}}").unwrap_err();

        assert_eq!(3, err.line);
    }

    #[test]
    fn tree_is_empty() {
        let trees = parse_one("  \n\t ").unwrap();

        assert!(trees["test"].is_empty());

        let trees = parse_one("x").unwrap();

        assert!(!trees["test"].is_empty());
    }

    #[test]
    fn error_context_is_clipped() {
        let trees = parse_one("{{print \"a long string constant\"}}").unwrap();
        let root = trees["test"].root.as_ref().unwrap();
        let context = Tree::error_context(&root.nodes[0]);

        assert_eq!(23, context.chars().count());
        assert!(context.ends_with("..."));
    }
}
