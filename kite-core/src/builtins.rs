//! Built-in functions and methods known to the checker.
//!
//! Builtins are not declarations: they live in these descriptor tables and
//! the checker consults them after user declarations. Codegen maps each
//! kind onto the runtime prelude.

/// Free functions available in every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    /// `println(fmt, args..)` to stdout with a newline.
    Println,
    Print,
    /// `eprintln(fmt, args..)` to stderr.
    Eprintln,
    /// Abort with a message; has type `never`.
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub kind: BuiltinFn,
    /// The first argument is a format string with `{}` holes.
    pub formats: bool,
}

pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: "println",
        kind: BuiltinFn::Println,
        formats: true,
    },
    BuiltinDescriptor {
        name: "print",
        kind: BuiltinFn::Print,
        formats: true,
    },
    BuiltinDescriptor {
        name: "eprintln",
        kind: BuiltinFn::Eprintln,
        formats: true,
    },
    BuiltinDescriptor {
        name: "panic",
        kind: BuiltinFn::Panic,
        formats: false,
    },
];

pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Count the `{}` holes of a format string; `{{` and `}}` are escapes.
pub fn format_holes(format: &str) -> usize {
    let mut holes = 0;
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('{', Some('{')) | ('}', Some('}')) => {
                chars.next();
            }
            ('{', Some('}')) => {
                chars.next();
                holes += 1;
            }
            _ => {}
        }
    }
    holes
}

/// Receiver shapes that carry builtin methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverShape {
    String,
    Vector,
    Array,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMethod {
    StringLen,
    StringIsEmpty,
    VectorLen,
    VectorPush,
    VectorPop,
    VectorIsEmpty,
    ArrayLen,
    OptionalHasValue,
}

impl BuiltinMethod {
    /// The method writes through its receiver.
    pub fn mutates(self) -> bool {
        matches!(self, BuiltinMethod::VectorPush | BuiltinMethod::VectorPop)
    }

    /// Evaluable by the compile-time interpreter.
    pub fn is_pure(self) -> bool {
        !self.mutates()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub receiver: ReceiverShape,
    pub name: &'static str,
    /// Number of arguments after the receiver.
    pub arity: usize,
    pub kind: BuiltinMethod,
}

pub const BUILTIN_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor {
        receiver: ReceiverShape::String,
        name: "len",
        arity: 0,
        kind: BuiltinMethod::StringLen,
    },
    MethodDescriptor {
        receiver: ReceiverShape::String,
        name: "is_empty",
        arity: 0,
        kind: BuiltinMethod::StringIsEmpty,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Vector,
        name: "len",
        arity: 0,
        kind: BuiltinMethod::VectorLen,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Vector,
        name: "push",
        arity: 1,
        kind: BuiltinMethod::VectorPush,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Vector,
        name: "pop",
        arity: 0,
        kind: BuiltinMethod::VectorPop,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Vector,
        name: "is_empty",
        arity: 0,
        kind: BuiltinMethod::VectorIsEmpty,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Array,
        name: "len",
        arity: 0,
        kind: BuiltinMethod::ArrayLen,
    },
    MethodDescriptor {
        receiver: ReceiverShape::Optional,
        name: "has_value",
        arity: 0,
        kind: BuiltinMethod::OptionalHasValue,
    },
];

pub fn find_builtin_method(receiver: ReceiverShape, name: &str) -> Option<&'static MethodDescriptor> {
    BUILTIN_METHODS
        .iter()
        .find(|method| method.receiver == receiver && method.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_builtins_by_name() {
        assert_eq!(find_builtin("println").map(|b| b.kind), Some(BuiltinFn::Println));
        assert!(find_builtin("printf").is_none());
        assert_eq!(
            find_builtin_method(ReceiverShape::Vector, "push").map(|m| m.arity),
            Some(1)
        );
        assert!(find_builtin_method(ReceiverShape::Array, "push").is_none());
    }

    #[test]
    fn counts_format_holes() {
        assert_eq!(format_holes("x = {}, y = {}"), 2);
        assert_eq!(format_holes("{{}} literal"), 0);
        assert_eq!(format_holes("{{{}}}"), 1);
        assert_eq!(format_holes("no holes"), 0);
    }
}
