//! The public template handle and the shared group behind it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use errors::{ExecError, ExecErrorKind, ParseError, ParseErrorKind, TemplateError};
use parser::Tree;
use span::NO_SPAN;

use crate::builtins::BUILTIN_NAMES;
use crate::exec;
use crate::funcs::FuncMap;
use crate::value::Value;

/// A named handle over a parsed tree and the group of templates it can
/// invoke.
///
/// Handles created with [`Template::new_associated`] (and every tree
/// installed by `{{define}}`) share one group: a name → tree map plus
/// the user function registry. Concurrent executions against the same
/// group are safe; executions hold the group's read lock, so parsing
/// from another thread waits for them.
pub struct Template {
    name: String,
    left_delim: Option<String>,
    right_delim: Option<String>,
    common: Arc<Common>,
}

/// Holds the information shared by related templates
struct Common {
    trees: RwLock<HashMap<String, Tree>>,
    funcs: Mutex<FuncMap>,
}

impl Template {
    /// Fresh handle with an empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            left_delim: None,
            right_delim: None,
            common: Arc::new(Common {
                trees: RwLock::new(HashMap::new()),
                funcs: Mutex::new(FuncMap::new()),
            }),
        }
    }

    /// New, undefined handle sharing `parent`'s group and delimiters;
    /// the association lets one template invoke another with a
    /// `{{template}}` action
    pub fn new_associated(name: impl Into<String>, parent: &Template) -> Self {
        Self {
            name: name.into(),
            left_delim: parent.left_delim.clone(),
            right_delim: parent.right_delim.clone(),
            common: Arc::clone(&parent.common),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the action delimiters; `None` reverts to `{{` and `}}`
    pub fn set_delims(&mut self, left: Option<&str>, right: Option<&str>) {
        self.left_delim = left.map(str::to_string);
        self.right_delim = right.map(str::to_string);
    }

    /// Merge `funcs` into the group's user registry
    pub fn add_funcs(&self, funcs: FuncMap) {
        self.lock_funcs().merge(funcs);
    }

    /// Parse `text` into this template's group. `{{define "X"}}` clauses
    /// install additional named templates; a definition whose body is
    /// only whitespace never replaces an existing non-empty one.
    pub fn parse(&self, text: &str) -> Result<(), TemplateError> {
        let trees = {
            let funcs = self.lock_funcs();
            let user_names = funcs.name_set();
            Tree::parse(
                &self.name,
                text,
                self.left_delim.as_deref(),
                self.right_delim.as_deref(),
                &[&user_names, &BUILTIN_NAMES],
            )?
        };

        tracing::debug!(template = %self.name, trees = trees.len(), "parsed template");

        let mut map = self.lock_trees_write();
        for (name, tree) in trees {
            associate(&mut map, name, tree);
        }

        Ok(())
    }

    /// Create a template group from named inputs; the first pair names
    /// the returned root template
    pub fn parse_inputs(
        funcs: Option<FuncMap>,
        inputs: &[(&str, &str)],
    ) -> Result<Template, TemplateError> {
        let Some(((root_name, _), _)) = inputs.split_first() else {
            return Err(no_input_error("<inputs>"));
        };

        let root = Template::new(*root_name);
        if let Some(funcs) = funcs {
            root.add_funcs(funcs);
        }
        root.parse_inputs_into(inputs)?;

        Ok(root)
    }

    /// Parse named inputs into this template's group
    pub fn parse_inputs_into(&self, inputs: &[(&str, &str)]) -> Result<(), TemplateError> {
        if inputs.is_empty() {
            return Err(no_input_error(&self.name));
        }
        for (name, text) in inputs {
            if *name == self.name {
                self.parse(text)?;
            } else {
                Template::new_associated(*name, self).parse(text)?;
            }
        }

        Ok(())
    }

    /// Create a template group from files; each file's base name names
    /// its template and the first file names the returned root
    pub fn parse_files<P: AsRef<Path>>(
        funcs: Option<FuncMap>,
        paths: &[P],
    ) -> Result<Template, TemplateError> {
        let inputs = read_files(paths)?;
        let borrowed: Vec<(&str, &str)> = inputs
            .iter()
            .map(|(name, text)| (name.as_str(), text.as_str()))
            .collect();

        Template::parse_inputs(funcs, &borrowed)
    }

    /// Parse template files into this template's group
    pub fn parse_files_into<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), TemplateError> {
        let inputs = read_files(paths)?;
        let borrowed: Vec<(&str, &str)> = inputs
            .iter()
            .map(|(name, text)| (name.as_str(), text.as_str()))
            .collect();

        self.parse_inputs_into(&borrowed)
    }

    /// Render this template against `data` into `writer`. On error,
    /// partial output may already have been written.
    pub fn execute<W: Write>(&self, writer: &mut W, data: &Value) -> Result<(), TemplateError> {
        let funcs = self.lock_funcs().clone();
        let trees = self.lock_trees_read();

        Ok(exec::execute(&trees, &funcs, writer, &self.name, data)?)
    }

    /// Render the associated template named `name` against `data`
    pub fn execute_template<W: Write>(
        &self,
        writer: &mut W,
        name: &str,
        data: &Value,
    ) -> Result<(), TemplateError> {
        let funcs = self.lock_funcs().clone();
        let trees = self.lock_trees_read();
        if !trees.contains_key(name) {
            return Err(TemplateError::Exec(ExecError {
                kind: ExecErrorKind::NoAssociatedTemplate {
                    name: name.to_string(),
                    parent: self.name.clone(),
                },
                template_name: name.to_string(),
                location: None,
            }));
        }

        Ok(exec::execute(&trees, &funcs, writer, name, data)?)
    }

    /// Handle for the associated template named `name`, if defined
    pub fn template(&self, name: &str) -> Option<Template> {
        let trees = self.lock_trees_read();
        if !trees.contains_key(name) {
            return None;
        }

        Some(Template {
            name: name.to_string(),
            left_delim: self.left_delim.clone(),
            right_delim: self.right_delim.clone(),
            common: Arc::clone(&self.common),
        })
    }

    /// Handles for every template defined in the group
    pub fn templates(&self) -> Vec<Template> {
        let trees = self.lock_trees_read();

        trees
            .keys()
            .map(|name| Template {
                name: name.clone(),
                left_delim: self.left_delim.clone(),
                right_delim: self.right_delim.clone(),
                common: Arc::clone(&self.common),
            })
            .collect()
    }

    /// Install a parse tree under `name`, replacing any existing tree
    /// unless the new one is empty and the old one is not
    pub fn add_parse_tree(&self, name: impl Into<String>, tree: Tree) {
        let mut map = self.lock_trees_write();
        associate(&mut map, name.into(), tree);
    }

    /// Rendering of the template's tree in template syntax, when parsed
    pub fn root_string(&self) -> Option<String> {
        let trees = self.lock_trees_read();

        trees
            .get(&self.name)
            .and_then(|tree| tree.root.as_ref())
            .map(|root| root.to_string())
    }

    fn lock_funcs(&self) -> MutexGuard<'_, FuncMap> {
        self.common.funcs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_trees_read(&self) -> RwLockReadGuard<'_, HashMap<String, Tree>> {
        self.common.trees.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_trees_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Tree>> {
        self.common.trees.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for Template {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            left_delim: self.left_delim.clone(),
            right_delim: self.right_delim.clone(),
            common: Arc::clone(&self.common),
        }
    }
}

/// If a template by that name exists and the incoming tree is empty,
/// keep the existing body
fn associate(map: &mut HashMap<String, Tree>, name: String, tree: Tree) {
    if let Some(old) = map.get(&name) {
        if tree.is_empty() && !old.is_empty() {
            return;
        }
    }
    map.insert(name, tree);
}

fn read_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<(String, String)>, TemplateError> {
    if paths.is_empty() {
        return Err(no_input_error("<files>"));
    }
    let mut inputs = vec![];
    for path in paths {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TemplateError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        inputs.push((name, text));
    }

    Ok(inputs)
}

fn no_input_error(parse_name: &str) -> TemplateError {
    TemplateError::Parse(ParseError {
        kind: ParseErrorKind::NoInput,
        parse_name: parse_name.to_string(),
        line: 1,
        column: 1,
        span: NO_SPAN,
    })
}
