//! Snippets: templates bound to the arguments of one call site.

use std::fmt;
use std::sync::Arc;

use kiln_core::{HubHandle, ResolutionGuard, ValueKind};
use smallvec::SmallVec;

use super::XirTemplate;

/// Compiler-side name of a value living in a register or stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Object constant embedded in generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectConstant {
    /// The null reference.
    Null,
    /// A type descriptor.
    Hub(HubHandle),
}

/// One argument bound to a template parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum XirArgument {
    /// Integer constant.
    Int(i32),
    /// Long constant.
    Long(i64),
    /// Word constant (addresses, entry points).
    Word(u64),
    /// Object constant.
    Object(ObjectConstant),
    /// Resolution guard embedded as an object constant.
    Guard(Arc<ResolutionGuard>),
    /// Value computed by the method being compiled.
    Value(ValueId),
}

impl XirArgument {
    /// Whether the argument is known at compile time.
    #[inline]
    pub fn is_constant(&self) -> bool {
        !matches!(self, XirArgument::Value(_))
    }

    /// Embed a guard.
    #[inline]
    pub fn guard(guard: ResolutionGuard) -> Self {
        XirArgument::Guard(Arc::new(guard))
    }

    /// Embed a hub.
    #[inline]
    pub fn hub(hub: HubHandle) -> Self {
        XirArgument::Object(ObjectConstant::Hub(hub))
    }

    fn fits(&self, kind: ValueKind) -> bool {
        match self {
            XirArgument::Int(_) => matches!(
                kind,
                ValueKind::Int
                    | ValueKind::Boolean
                    | ValueKind::Byte
                    | ValueKind::Short
                    | ValueKind::Char
            ),
            XirArgument::Long(_) => kind == ValueKind::Long,
            XirArgument::Word(_) => kind == ValueKind::Word,
            XirArgument::Object(_) | XirArgument::Guard(_) => kind == ValueKind::Object,
            XirArgument::Value(_) => true,
        }
    }
}

impl fmt::Display for XirArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XirArgument::Int(v) => write!(f, "{v}"),
            XirArgument::Long(v) => write!(f, "{v}L"),
            XirArgument::Word(v) => write!(f, "{v:#x}"),
            XirArgument::Object(ObjectConstant::Null) => f.write_str("null"),
            XirArgument::Object(ObjectConstant::Hub(hub)) => write!(f, "hub@{:#x}", hub.0),
            XirArgument::Guard(guard) => write!(f, "{guard}"),
            XirArgument::Value(v) => write!(f, "v{}", v.0),
        }
    }
}

/// A template plus the arguments bound at one call site.
#[derive(Debug, Clone)]
pub struct Snippet {
    template: Arc<XirTemplate>,
    arguments: SmallVec<[XirArgument; 4]>,
}

impl Snippet {
    /// Bind `arguments` to `template`.
    ///
    /// Constant parameters must receive constant arguments of a matching
    /// kind; this is checked in debug builds.
    pub fn new(template: Arc<XirTemplate>, arguments: impl IntoIterator<Item = XirArgument>) -> Self {
        let arguments: SmallVec<[XirArgument; 4]> = arguments.into_iter().collect();
        debug_assert_eq!(
            arguments.len(),
            template.parameters().len(),
            "argument count for {}",
            template.name()
        );
        debug_assert!(
            arguments.iter().enumerate().all(|(i, arg)| {
                let param = template.parameters()[i];
                arg.fits(param.kind()) && (!template.is_constant_parameter(i) || arg.is_constant())
            }),
            "argument kinds for {}",
            template.name()
        );
        Self {
            template,
            arguments,
        }
    }

    /// The bound template.
    #[inline]
    pub fn template(&self) -> &Arc<XirTemplate> {
        &self.template
    }

    /// Bound arguments in parameter order.
    #[inline]
    pub fn arguments(&self) -> &[XirArgument] {
        &self.arguments
    }
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.template.name())?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}
