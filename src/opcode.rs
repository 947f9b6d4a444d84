use core::fmt::Write as _;

use crate::schema::Ty;

/// Scalar value classes the opcode set specializes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Bool,
}

impl Scalar {
    fn suffix(self) -> &'static str {
        match self {
            Scalar::Int => "int",
            Scalar::Int8 => "int8",
            Scalar::Int16 => "int16",
            Scalar::Int32 => "int32",
            Scalar::Int64 => "int64",
            Scalar::Uint => "uint",
            Scalar::Uint8 => "uint8",
            Scalar::Uint16 => "uint16",
            Scalar::Uint32 => "uint32",
            Scalar::Uint64 => "uint64",
            Scalar::Float32 => "float32",
            Scalar::Float64 => "float64",
            Scalar::String => "string",
            Scalar::Bool => "bool",
        }
    }
}

/// Specialization of a record head or field opcode.
///
/// The original opcode set enumerates every permutation by name
/// (`struct_field_head_int_omit_empty_indent`, ...); here the permutation
/// axes are fields of the tag, so the head/field rewrites are total
/// functions instead of name tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSpec {
    /// Scalar specialization when the field value is a scalar program.
    pub scalar: Option<Scalar>,
    pub omit_empty: bool,
    pub indent: bool,
    /// Head reached through a pointer; the value must be loaded first.
    pub deref: bool,
    /// Head of an embedded record inlined into the enclosing record.
    pub anonymous: bool,
}

/// Opcode tag. One per node; the VM dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Program terminator.
    End,
    Ptr,
    Dynamic,
    MarshalJson,
    MarshalText,
    Scalar(Scalar),
    SliceHead { root: bool, indent: bool },
    SliceElem { root: bool, indent: bool },
    SliceEnd { indent: bool },
    ArrayHead { indent: bool },
    ArrayElem { indent: bool },
    ArrayEnd { indent: bool },
    MapHead { load: bool, root: bool, indent: bool },
    MapKey { root: bool, indent: bool },
    MapValue { indent: bool },
    MapEnd { indent: bool },
    StructFieldHead(FieldSpec),
    StructField(FieldSpec),
    StructEnd { indent: bool },
    StructAnonymousEnd,
    Recursive,
}

impl Op {
    /// Rewrite a record head so the value is loaded through a pointer
    /// first. Anything that is not a plain record head is returned
    /// unchanged; the caller then falls back to a `Ptr` wrapper node.
    pub fn head_to_ptr_head(self) -> Op {
        match self {
            Op::StructFieldHead(spec) if !spec.deref => Op::StructFieldHead(FieldSpec {
                deref: true,
                ..spec
            }),
            other => other,
        }
    }

    /// Rewrite a record head into its inlined-embedded variant.
    pub fn head_to_anonymous_head(self) -> Op {
        match self {
            Op::StructFieldHead(spec) => Op::StructFieldHead(FieldSpec {
                anonymous: true,
                ..spec
            }),
            other => other,
        }
    }

    pub fn is_end(self) -> bool {
        self == Op::End
    }

    /// Dump name, mirroring the conventional family naming.
    pub fn name(self) -> String {
        fn field_name(base: &str, spec: FieldSpec) -> String {
            let mut name = String::from("struct_field");
            if spec.anonymous {
                name.push_str("_anonymous");
            }
            if spec.deref {
                name.push_str("_ptr");
            }
            name.push_str(base);
            if let Some(scalar) = spec.scalar {
                name.push('_');
                name.push_str(scalar.suffix());
            }
            if spec.omit_empty {
                name.push_str("_omit_empty");
            }
            if spec.indent {
                name.push_str("_indent");
            }
            name
        }
        fn decorate(base: &str, root: bool, indent: bool) -> String {
            let mut name = String::new();
            if root {
                name.push_str("root_");
            }
            name.push_str(base);
            if indent {
                name.push_str("_indent");
            }
            name
        }
        match self {
            Op::End => "end".into(),
            Op::Ptr => "ptr".into(),
            Op::Dynamic => "dynamic".into(),
            Op::MarshalJson => "marshal_json".into(),
            Op::MarshalText => "marshal_text".into(),
            Op::Scalar(s) => s.suffix().into(),
            Op::SliceHead { root, indent } => decorate("slice_head", root, indent),
            Op::SliceElem { root, indent } => decorate("slice_elem", root, indent),
            Op::SliceEnd { indent } => decorate("slice_end", false, indent),
            Op::ArrayHead { indent } => decorate("array_head", false, indent),
            Op::ArrayElem { indent } => decorate("array_elem", false, indent),
            Op::ArrayEnd { indent } => decorate("array_end", false, indent),
            Op::MapHead { load, root, indent } => {
                decorate(if load { "map_head_load" } else { "map_head" }, root, indent)
            }
            Op::MapKey { root, indent } => decorate("map_key", root, indent),
            Op::MapValue { indent } => decorate("map_value", false, indent),
            Op::MapEnd { indent } => decorate("map_end", false, indent),
            Op::StructFieldHead(spec) => field_name("_head", spec),
            Op::StructField(spec) => field_name("", spec),
            Op::StructEnd { indent } => decorate("struct_end", false, indent),
            Op::StructAnonymousEnd => "struct_anonymous_end".into(),
            Op::Recursive => "struct_field_recursive".into(),
        }
    }
}

/// Index of a node within a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeId(pub(crate) u32);

/// Index of a memoized record program. Slots are created before the record
/// is compiled and filled when compilation of that record returns, which is
/// what lets recursive schemas close their cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub(crate) u32);

/// Kind-specific payload of a node.
#[derive(Debug, Clone)]
pub enum Body {
    None,
    Dynamic { root: bool },
    SliceHead { elem: CodeId, end: CodeId },
    SliceElem { size: usize, end: CodeId },
    ArrayHead { len: usize, elem: CodeId, end: CodeId },
    ArrayElem { len: usize, size: usize, end: CodeId },
    MapHead { key: CodeId, value: CodeId, end: CodeId },
    MapKey { end: CodeId },
    StructField(StructFieldBody),
    Recursive { jmp: SlotId },
}

/// Payload of record head, field, and end nodes.
#[derive(Debug, Clone, Default)]
pub struct StructFieldBody {
    /// Raw key bytes, quotes and trailing colon included (`"name":`).
    pub key: Vec<u8>,
    /// Byte offset of the field within the record.
    pub offset: usize,
    /// The key belongs to an embedded record slot.
    pub anonymous_key: bool,
    /// Next field at the same record level; the last field links to the
    /// record-end node.
    pub next_field: Option<CodeId>,
    /// Record-end node, set on the head.
    pub end: Option<CodeId>,
}

/// One node of a compiled program.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub ty: Option<Ty>,
    pub indent: u32,
    /// Forward edge; `None` only on the `end` sentinel.
    pub next: Option<CodeId>,
    pub body: Body,
}

impl Node {
    /// Struct-field payload accessor for head/field/end nodes.
    pub fn field(&self) -> Option<&StructFieldBody> {
        match &self.body {
            Body::StructField(body) => Some(body),
            _ => None,
        }
    }
}

/// Arena holding every node of a compiled program graph.
///
/// Nodes are mutated freely while the compiler owns the arena and are
/// frozen once it is published inside a
/// [`CompiledEncoder`](crate::compile::CompiledEncoder).
#[derive(Debug, Default, Clone)]
pub struct Program {
    nodes: Vec<Node>,
    compiled: Vec<Option<CodeId>>,
}

impl Program {
    pub fn node(&self, id: CodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: CodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn push(&mut self, node: Node) -> CodeId {
        let id = CodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (CodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (CodeId(i as u32), node))
    }

    pub(crate) fn new_slot(&mut self) -> SlotId {
        let slot = SlotId(self.compiled.len() as u32);
        self.compiled.push(None);
        slot
    }

    pub(crate) fn fill_slot(&mut self, slot: SlotId, head: CodeId) {
        self.compiled[slot.0 as usize] = Some(head);
    }

    /// Head of the memoized record program a `Recursive` node jumps to.
    /// `None` only while that record is still being compiled.
    pub fn resolve(&self, slot: SlotId) -> Option<CodeId> {
        self.compiled[slot.0 as usize]
    }

    /// One step of the program walk: the forward edge, except at loop
    /// nodes (sequence/array element markers and map keys) where the exit
    /// edge is taken.
    pub fn walk_next(&self, id: CodeId) -> Option<CodeId> {
        let node = self.node(id);
        match node.body {
            Body::SliceElem { end, .. }
            | Body::ArrayElem { end, .. }
            | Body::MapKey { end } => Some(end),
            _ => node.next,
        }
    }

    /// The node just before the `end` sentinel, walking forward from
    /// `head`. Aggregate compilers splice the next node there.
    pub(crate) fn before_last(&self, head: CodeId) -> CodeId {
        let mut code = head;
        loop {
            let next = self
                .walk_next(code)
                .expect("walk ran past the end sentinel");
            if self.node(next).op.is_end() {
                return code;
            }
            code = next;
        }
    }

    /// Render the walk from `head` for debugging, one node per line.
    pub fn dump(&self, head: CodeId) -> String {
        let mut out = String::new();
        let mut code = Some(head);
        while let Some(id) = code {
            let node = self.node(id);
            let _ = write!(out, "{:4}: {}", id.0, node.op.name());
            if node.indent > 0 {
                let _ = write!(out, " indent={}", node.indent);
            }
            if let Some(body) = node.field() {
                if !body.key.is_empty() {
                    let _ = write!(out, " key={}", String::from_utf8_lossy(&body.key));
                }
            }
            out.push('\n');
            if node.op.is_end() {
                break;
            }
            code = self.walk_next(id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_head_rewrite_is_idempotent() {
        let head = Op::StructFieldHead(FieldSpec {
            scalar: Some(Scalar::Int),
            ..FieldSpec::default()
        });
        let ptr_head = head.head_to_ptr_head();
        assert_ne!(head, ptr_head);
        assert_eq!(ptr_head.head_to_ptr_head(), ptr_head);
    }

    #[test]
    fn names_compose_modifiers() {
        let op = Op::StructFieldHead(FieldSpec {
            scalar: Some(Scalar::Int),
            omit_empty: true,
            indent: true,
            ..FieldSpec::default()
        });
        assert_eq!(op.name(), "struct_field_head_int_omit_empty_indent");
        assert_eq!(
            Op::SliceHead { root: true, indent: true }.name(),
            "root_slice_head_indent"
        );
    }
}
