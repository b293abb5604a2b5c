//! Stack frame, lexical scope and variable types.

use super::{Address, TypeLayout};

/// One physical stack frame reported by the process-control layer
#[derive(Debug, Clone)]
pub struct Frame
{
    /// Best-effort function name
    pub function: Option<String>,
    /// Program counter of this frame
    pub pc: Address,
    /// Lexical scopes from the innermost block outwards, or `None` when the
    /// frame has no debug-info block (e.g. a leaf without scope information)
    pub scopes: Option<Vec<Scope>>,
}

impl Frame
{
    /// Frame with debug information
    pub fn new(function: impl Into<String>, pc: Address, scopes: Vec<Scope>) -> Self
    {
        Self {
            function: Some(function.into()),
            pc,
            scopes: Some(scopes),
        }
    }

    /// Frame without a debug-info block
    pub fn opaque(pc: Address) -> Self
    {
        Self {
            function: None,
            pc,
            scopes: None,
        }
    }

    /// Name used in log messages
    pub fn display_name(&self) -> &str
    {
        self.function.as_deref().unwrap_or("<unknown>")
    }
}

/// One lexical block inside a frame
#[derive(Debug, Clone, Default)]
pub struct Scope
{
    /// Arguments and locals declared in this block, in declaration order
    pub variables: Vec<Variable>,
}

impl Scope
{
    /// Create a scope from its variables
    pub fn new(variables: Vec<Variable>) -> Self
    {
        Self { variables }
    }
}

/// Declared variable with its static type and live location
#[derive(Debug, Clone)]
pub struct Variable
{
    /// Source-level name
    pub name: String,
    /// Structural description of the static type
    pub layout: TypeLayout,
    /// Address of the variable in the target
    pub address: Address,
    /// Size in bytes
    pub size: u64,
}

impl Variable
{
    /// Create a variable whose size is taken from its layout
    pub fn new(name: impl Into<String>, layout: TypeLayout, address: Address) -> Self
    {
        let size = layout.size();
        Self {
            name: name.into(),
            layout,
            address,
            size,
        }
    }
}
