//! Kernel specifications and the imperative builder
//!
//! A [`KernelSpec`] is the static description of a kernel: its formal
//! parameters (name, element type, access mode, shape), grid dimensions,
//! tuneables, constraints, and grid expression. Specs are built imperatively
//! by back-end registration code:
//!
//! ```
//! use prism_core::KernelSpecBuilder;
//!
//! # fn main() -> prism_core::Result<()> {
//! let spec = KernelSpecBuilder::new("zero")
//!     .add_dimension("i", "n", 64)?
//!     .add_parameter("buf", "w", "u32[n]")?
//!     .add_parameter("n", "r", "u32")?
//!     .set_grid_expression("[ceilDiv(n,64)*64]", "[64]")?
//!     .allow_grid_padding()
//!     .finish()?;
//! assert_eq!(spec.name(), "zero");
//! # Ok(())
//! # }
//! ```
//!
//! Type expressions follow the grammar `IDENT | IDENT "[" EXPR "]"` where the
//! identifier names a registered element type and the extent expression may
//! reference tuneables, dimensions, or primitive parameters (including ones
//! declared later; identifier resolution happens in `finish`).

use crate::error::{Error, Result};
use crate::expr::{Env, ShapeExpr};
use crate::types::{lookup_type, TypeDescriptor};
use std::collections::HashSet;
use std::fmt;

/// How a kernel accesses a parameter
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Parse the declaration spelling: `"r"`, `"w"`, or `"rw"`
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(AccessMode::ReadOnly),
            "w" => Ok(AccessMode::WriteOnly),
            "rw" => Ok(AccessMode::ReadWrite),
            other => Err(Error::InvalidExpression {
                context: "access mode".to_string(),
                detail: format!("{other:?} is not one of \"r\", \"w\", \"rw\""),
            }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "r",
            AccessMode::WriteOnly => "w",
            AccessMode::ReadWrite => "rw",
        }
    }

    /// Whether the kernel may write through this parameter
    pub const fn is_writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a formal parameter: a single value or an array with a symbolic
/// extent
#[derive(Clone, Debug)]
pub enum ParamShape {
    Scalar(TypeDescriptor),
    Array {
        elem: TypeDescriptor,
        extent: ShapeExpr,
    },
}

impl ParamShape {
    pub fn elem(&self) -> &TypeDescriptor {
        match self {
            ParamShape::Scalar(desc) => desc,
            ParamShape::Array { elem, .. } => elem,
        }
    }

    pub const fn is_scalar(&self) -> bool {
        matches!(self, ParamShape::Scalar(_))
    }
}

/// One formal parameter of a kernel
#[derive(Clone, Debug)]
pub struct FormalParameter {
    pub name: String,
    pub access: AccessMode,
    pub shape: ParamShape,
}

/// One grid dimension: a name, a symbolic extent, and an optional default
/// block size
#[derive(Clone, Debug)]
pub struct Dimension {
    pub name: String,
    pub extent: ShapeExpr,
    pub default_block: Option<u32>,
}

/// Comparison operator of a constraint
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstraintOp {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
    Ne,
}

impl ConstraintOp {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "==" => Ok(ConstraintOp::Eq),
            "<=" => Ok(ConstraintOp::Le),
            "<" => Ok(ConstraintOp::Lt),
            ">=" => Ok(ConstraintOp::Ge),
            ">" => Ok(ConstraintOp::Gt),
            "!=" => Ok(ConstraintOp::Ne),
            other => Err(Error::InvalidExpression {
                context: "constraint operator".to_string(),
                detail: format!("{other:?} is not a comparison operator"),
            }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ConstraintOp::Eq => "==",
            ConstraintOp::Le => "<=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ne => "!=",
        }
    }

    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            ConstraintOp::Eq => lhs == rhs,
            ConstraintOp::Le => lhs <= rhs,
            ConstraintOp::Lt => lhs < rhs,
            ConstraintOp::Ge => lhs >= rhs,
            ConstraintOp::Gt => lhs > rhs,
            ConstraintOp::Ne => lhs != rhs,
        }
    }
}

/// A declared relation between two expressions
///
/// Constraints whose identifiers all resolve at bind time are asserted;
/// the rest are tuning hints for back-ends.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub lhs: ShapeExpr,
    pub op: ConstraintOp,
    pub rhs: ShapeExpr,
    pub rationale: String,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.as_str(), self.rhs)
    }
}

/// Per-axis global and local work sizes
#[derive(Clone, Debug)]
pub struct GridExpression {
    pub global: Vec<ShapeExpr>,
    pub local: Vec<ShapeExpr>,
}

/// Static description of a kernel
#[derive(Clone, Debug)]
pub struct KernelSpec {
    name: String,
    params: Vec<FormalParameter>,
    dims: Vec<Dimension>,
    tuneables: Vec<(String, i64)>,
    constraints: Vec<Constraint>,
    grid: Option<GridExpression>,
    allow_grid_padding: bool,
}

impl KernelSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[FormalParameter] {
        &self.params
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn tuneables(&self) -> &[(String, i64)] {
        &self.tuneables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn grid_expression(&self) -> Option<&GridExpression> {
        self.grid.as_ref()
    }

    /// Whether work items beyond the logical extent may be launched (and are
    /// expected to return early)
    pub fn allows_grid_padding(&self) -> bool {
        self.allow_grid_padding
    }

    /// Evaluation environment seeded with the tuneable defaults
    pub fn base_env(&self) -> Env {
        let mut env = Env::new();
        for (name, value) in &self.tuneables {
            env.insert(name.clone(), *value);
        }
        env
    }
}

/// Imperative builder for [`KernelSpec`]
///
/// Declarations may reference identifiers declared later; `finish` checks
/// that every identifier used by a shape, grid, or constraint expression
/// names a tuneable, a dimension, or a primitive parameter.
pub struct KernelSpecBuilder {
    spec: KernelSpec,
}

impl KernelSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: KernelSpec {
                name: name.into(),
                params: Vec::new(),
                dims: Vec::new(),
                tuneables: Vec::new(),
                constraints: Vec::new(),
                grid: None,
                allow_grid_padding: false,
            },
        }
    }

    fn duplicate(&self, scope: &str, name: &str) -> Error {
        Error::DuplicateName {
            scope: format!("{scope} of kernel {}", self.spec.name),
            name: name.to_string(),
        }
    }

    /// Declare a formal parameter
    ///
    /// `access` is `"r"`, `"w"`, or `"rw"`; `type_expr` is
    /// `IDENT | IDENT "[" EXPR "]"` with the identifier naming a registered
    /// element type.
    pub fn add_parameter(mut self, name: &str, access: &str, type_expr: &str) -> Result<Self> {
        if self.spec.params.iter().any(|p| p.name == name) {
            return Err(self.duplicate("parameters", name));
        }
        let access = AccessMode::parse(access)?;
        let shape = self.parse_type_expr(name, type_expr)?;
        self.spec.params.push(FormalParameter {
            name: name.to_string(),
            access,
            shape,
        });
        Ok(self)
    }

    /// Declare a grid dimension with an optional default block size
    pub fn add_dimension(
        mut self,
        name: &str,
        extent_expr: &str,
        default_block: impl Into<Option<u32>>,
    ) -> Result<Self> {
        if self.spec.dims.iter().any(|d| d.name == name) {
            return Err(self.duplicate("dimensions", name));
        }
        let context = format!("dimension {name} of kernel {}", self.spec.name);
        let extent = ShapeExpr::parse(extent_expr, &context)?;
        self.spec.dims.push(Dimension {
            name: name.to_string(),
            extent,
            default_block: default_block.into(),
        });
        Ok(self)
    }

    /// Declare a named integer tuneable with its default
    pub fn add_tuneable(mut self, name: &str, default: i64) -> Result<Self> {
        if self.spec.tuneables.iter().any(|(n, _)| n == name) {
            return Err(self.duplicate("tuneables", name));
        }
        self.spec.tuneables.push((name.to_string(), default));
        Ok(self)
    }

    /// Declare a constraint with its rationale
    pub fn add_constraint(mut self, lhs: &str, op: &str, rhs: &str, why: &str) -> Result<Self> {
        let context = format!("constraint of kernel {}", self.spec.name);
        self.spec.constraints.push(Constraint {
            lhs: ShapeExpr::parse(lhs, &context)?,
            op: ConstraintOp::parse(op)?,
            rhs: ShapeExpr::parse(rhs, &context)?,
            rationale: why.to_string(),
        });
        Ok(self)
    }

    /// Set the per-axis global and local work sizes
    ///
    /// Each argument is a bracketed, comma-separated expression list; both
    /// lists must have one entry per declared dimension.
    pub fn set_grid_expression(mut self, global: &str, local: &str) -> Result<Self> {
        let context = format!("grid expression of kernel {}", self.spec.name);
        self.spec.grid = Some(GridExpression {
            global: ShapeExpr::parse_list(global, &context)?,
            local: ShapeExpr::parse_list(local, &context)?,
        });
        Ok(self)
    }

    /// Allow launching padded work items past the logical extents
    pub fn allow_grid_padding(mut self) -> Self {
        self.spec.allow_grid_padding = true;
        self
    }

    /// Validate cross-references and freeze the spec
    pub fn finish(self) -> Result<KernelSpec> {
        let spec = &self.spec;

        if let Some(grid) = &spec.grid {
            if grid.global.len() != spec.dims.len() || grid.local.len() != spec.dims.len() {
                return Err(Error::InvalidExpression {
                    context: format!("grid expression of kernel {}", spec.name),
                    detail: format!(
                        "{} global / {} local entries for {} dimensions",
                        grid.global.len(),
                        grid.local.len(),
                        spec.dims.len()
                    ),
                });
            }
        }

        // Identifiers usable by expressions: tuneables, dimension names, and
        // the names of primitive parameters (resolved to values at bind time).
        let mut known: HashSet<&str> = HashSet::new();
        known.extend(spec.tuneables.iter().map(|(n, _)| n.as_str()));
        known.extend(spec.dims.iter().map(|d| d.name.as_str()));
        known.extend(
            spec.params
                .iter()
                .filter(|p| p.shape.is_scalar())
                .map(|p| p.name.as_str()),
        );

        let check = |expr: &ShapeExpr, context: String| -> Result<()> {
            let mut names = Vec::new();
            expr.idents(&mut names);
            for name in names {
                if !known.contains(name) {
                    return Err(Error::UnknownIdentifier {
                        context,
                        name: name.to_string(),
                    });
                }
            }
            Ok(())
        };

        for p in &spec.params {
            if let ParamShape::Array { extent, .. } = &p.shape {
                check(
                    extent,
                    format!("parameter {} of kernel {}", p.name, spec.name),
                )?;
            }
        }
        for d in &spec.dims {
            check(
                &d.extent,
                format!("dimension {} of kernel {}", d.name, spec.name),
            )?;
        }
        for c in &spec.constraints {
            let context = format!("constraint of kernel {}", spec.name);
            check(&c.lhs, context.clone())?;
            check(&c.rhs, context)?;
        }
        if let Some(grid) = &spec.grid {
            for expr in grid.global.iter().chain(&grid.local) {
                check(expr, format!("grid expression of kernel {}", spec.name))?;
            }
        }

        Ok(self.spec)
    }

    fn parse_type_expr(&self, param: &str, type_expr: &str) -> Result<ParamShape> {
        let context = format!("parameter {param} of kernel {}", self.spec.name);
        let type_expr = type_expr.trim();
        match type_expr.find('[') {
            None => Ok(ParamShape::Scalar(lookup_type(type_expr)?)),
            Some(open) => {
                let elem_name = type_expr[..open].trim();
                let rest = &type_expr[open..];
                if !rest.ends_with(']') {
                    return Err(Error::InvalidExpression {
                        context,
                        detail: format!("unterminated extent in {type_expr:?}"),
                    });
                }
                let extent = ShapeExpr::parse(&rest[1..rest.len() - 1], &context)?;
                Ok(ParamShape::Array {
                    elem: lookup_type(elem_name)?,
                    extent,
                })
            }
        }
    }
}
