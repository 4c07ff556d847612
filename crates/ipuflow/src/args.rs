// Args - Binding call-site arguments to a model's declared signature
//
// A model declares its forward parameters once (a Signature). Every call
// supplies positional and keyword arguments (CallArgs). The binder merges
// them into one ordered list (a Binding) mirroring the declared order:
//
//   declared:  (a, b = None, c = None)
//   call:      f(x)              → [x]          b, c absent
//   call:      f(x, c = y)       → error: c after b defaulted to None
//
// Once an optional parameter falls back to a None default, the binding
// stops. Any later default is dropped and any later explicit keyword
// argument is a hard error: the traced graph takes its inputs as a flat
// list, so a tensor can't appear after a hole.
//
// The binding is rebuilt on every call and never cached.

use ipuflow_core::{ArgTree, Error, Result, Value};

/// One declared parameter of a model's forward function.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    default: Option<ArgTree>,
}

impl Parameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<ArgTree>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> Option<&ArgTree> {
        self.default.as_ref()
    }
}

/// The declared parameter list of a forward function, receiver excluded.
///
/// Required parameters must come before optional ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter::required(name));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: impl Into<ArgTree>) -> Self {
        self.params.push(Parameter::optional(name, default));
        self
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// Positional and keyword arguments of a single call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<ArgTree>,
    keyword: Vec<(String, ArgTree)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<ArgTree>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<ArgTree>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn positional(&self) -> &[ArgTree] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, ArgTree)] {
        &self.keyword
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keyword_value(&self, name: &str) -> Option<&ArgTree> {
        self.keyword.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Arguments bound to a signature, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    names: Vec<String>,
    args: Vec<ArgTree>,
}

impl Binding {
    pub fn bind(signature: &Signature, call: &CallArgs) -> Result<Self> {
        let params = signature.params();

        for (i, (name, _)) in call.keyword.iter().enumerate() {
            let repeated = call.keyword[..i].iter().any(|(k, _)| k == name);
            let positional = signature
                .position(name)
                .is_some_and(|idx| idx < call.positional.len());
            if repeated || positional {
                return Err(Error::DuplicateArgument { name: name.clone() });
            }
        }

        if call.len() > params.len() {
            return Err(Error::TooManyArguments {
                expected: signature.names(),
                got: call.len(),
            });
        }

        if let Some((name, _)) = call
            .keyword
            .iter()
            .find(|(name, _)| signature.position(name).is_none())
        {
            return Err(Error::UnexpectedKeywordArgument { name: name.clone() });
        }

        let mut names = Vec::new();
        let mut args = Vec::new();
        let mut none_passed: Vec<String> = Vec::new();
        for (i, param) in params.iter().enumerate() {
            if let Some(value) = call.positional.get(i) {
                names.push(param.name.clone());
                args.push(value.clone());
            } else if let Some(value) = call.keyword_value(&param.name) {
                if !none_passed.is_empty() {
                    return Err(Error::TrailingTensorAfterNone {
                        name: param.name.clone(),
                        defaulted: none_passed,
                    });
                }
                names.push(param.name.clone());
                args.push(value.clone());
            } else {
                let default = param.default.as_ref().ok_or_else(|| {
                    Error::MissingMandatoryArgument {
                        name: param.name.clone(),
                    }
                })?;
                if default.is_none() {
                    none_passed.push(format!("{} ({})", param.name, i));
                }
                if none_passed.is_empty() {
                    names.push(param.name.clone());
                    args.push(default.clone());
                }
            }
        }

        Ok(Self { names, args })
    }

    /// Names of the bound parameters, in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Top-level bound arguments, one per bound parameter.
    pub fn as_slice(&self) -> &[ArgTree] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Apply `f` to every leaf, keeping the container structure.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Value) -> Result<Value>,
    {
        let args = std::mem::take(&mut self.args);
        self.args = args
            .into_iter()
            .map(|arg| arg.map(&mut f))
            .collect::<Result<_>>()?;
        Ok(())
    }

    /// Apply `f` to the leaves matching `pred`. Returns whether at least
    /// one leaf matched.
    pub fn for_each_matched_at_least_once<P, F>(&mut self, mut pred: P, mut f: F) -> Result<bool>
    where
        P: FnMut(&Value) -> bool,
        F: FnMut(Value) -> Result<Value>,
    {
        let mut matched = false;
        let args = std::mem::take(&mut self.args);
        self.args = args
            .into_iter()
            .map(|arg| arg.map_matched(&mut pred, &mut f, &mut matched))
            .collect::<Result<_>>()?;
        Ok(matched)
    }

    /// Leaf values in binding order: the form handed to compile and execute.
    pub fn as_flat_sequence(&self) -> Vec<Value> {
        self.args.iter().flat_map(ArgTree::flatten).collect()
    }

    pub fn into_inner(self) -> Vec<ArgTree> {
        self.args
    }
}
