use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::Error;
use crate::opcode::{
    Body, CodeId, FieldSpec, Node, Op, Program, Scalar, SlotId, StructFieldBody,
};
use crate::schema::{Field, Kind, Ty, Types};

/// A published encode program: immutable once returned, safe to share
/// read-only across threads.
#[derive(Debug, Clone)]
pub struct CompiledEncoder {
    program: Program,
    head: CodeId,
}

impl CompiledEncoder {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn head(&self) -> CodeId {
        self.head
    }

    /// One line per node of the head walk, for debugging.
    pub fn dump(&self) -> String {
        self.program.dump(self.head)
    }
}

/// Lowers type descriptors into linked opcode programs.
///
/// One compiler instance serves one top-level compilation: the record memo
/// is private to it, so nothing outside the call can observe a partially
/// built program.
pub struct Compiler<'t> {
    types: &'t Types,
    indent: u32,
    program: Program,
    /// Record memo keyed by `(type, indent mode)`. Entries are created
    /// before a record's fields are compiled; re-encountering the key means
    /// a back edge, answered with a jump node.
    memo: FxHashMap<(Ty, bool), SlotId>,
}

impl<'t> Compiler<'t> {
    pub fn new(types: &'t Types) -> Self {
        Compiler {
            types,
            indent: 0,
            program: Program::default(),
            memo: FxHashMap::default(),
        }
    }

    /// Compile the program for a top-level value of type `ty`.
    pub fn compile_head(mut self, ty: Ty, with_indent: bool) -> Result<CompiledEncoder, Error> {
        let types = self.types;
        let desc = types.get(ty);
        let head = if desc.marshal_json {
            self.single(Op::MarshalJson, ty)
        } else if desc.marshal_text {
            self.single(Op::MarshalText, ty)
        } else {
            let ty = if types.kind(ty) == Kind::Ptr {
                types.elem(ty)
            } else {
                ty
            };
            let root = true;
            if types.kind(ty) == Kind::Map {
                self.compile_map(ty, false, root, with_indent)?
            } else {
                self.compile(ty, root, with_indent)?
            }
        };
        debug!(nodes = self.program.len(), "published encode program");
        Ok(CompiledEncoder {
            program: self.program,
            head,
        })
    }

    /// Recursive compilation entry: the program for one value of type `ty`
    /// embedded at the current position.
    pub fn compile(&mut self, ty: Ty, root: bool, with_indent: bool) -> Result<CodeId, Error> {
        let types = self.types;
        let desc = types.get(ty);
        if desc.marshal_json {
            return Ok(self.single(Op::MarshalJson, ty));
        }
        if desc.marshal_text {
            return Ok(self.single(Op::MarshalText, ty));
        }
        trace!(ty = %types.display(ty), root, with_indent, "compile");
        match desc.kind {
            Kind::Ptr => self.compile_ptr(ty, root, with_indent),
            Kind::Slice => self.compile_slice(ty, root, with_indent),
            Kind::Array => self.compile_array(ty, with_indent),
            Kind::Map => self.compile_map(ty, true, root, with_indent),
            Kind::Struct => self.compile_struct(ty, root, with_indent),
            Kind::Dyn => Ok(self.compile_dynamic(ty, root)),
            Kind::Int => Ok(self.single(Op::Scalar(Scalar::Int), ty)),
            Kind::Int8 => Ok(self.single(Op::Scalar(Scalar::Int8), ty)),
            Kind::Int16 => Ok(self.single(Op::Scalar(Scalar::Int16), ty)),
            Kind::Int32 => Ok(self.single(Op::Scalar(Scalar::Int32), ty)),
            Kind::Int64 => Ok(self.single(Op::Scalar(Scalar::Int64), ty)),
            Kind::Uint => Ok(self.single(Op::Scalar(Scalar::Uint), ty)),
            Kind::Uint8 => Ok(self.single(Op::Scalar(Scalar::Uint8), ty)),
            Kind::Uint16 => Ok(self.single(Op::Scalar(Scalar::Uint16), ty)),
            Kind::Uint32 => Ok(self.single(Op::Scalar(Scalar::Uint32), ty)),
            Kind::Uint64 => Ok(self.single(Op::Scalar(Scalar::Uint64), ty)),
            Kind::Uintptr => Ok(self.single(Op::Scalar(Scalar::Uint), ty)),
            Kind::Float32 => Ok(self.single(Op::Scalar(Scalar::Float32), ty)),
            Kind::Float64 => Ok(self.single(Op::Scalar(Scalar::Float64), ty)),
            Kind::String => Ok(self.single(Op::Scalar(Scalar::String), ty)),
            Kind::Bool => Ok(self.single(Op::Scalar(Scalar::Bool), ty)),
            Kind::Func => Err(Error::UnsupportedType {
                ty: types.display(ty),
            }),
        }
    }

    /// Consume the compiler without publishing, for callers driving
    /// [`Compiler::compile`] directly.
    pub fn into_program(self) -> Program {
        self.program
    }

    // ── node constructors ───────────────────────────────────────────────

    fn end_op(&mut self) -> CodeId {
        self.program.push(Node {
            op: Op::End,
            ty: None,
            indent: self.indent,
            next: None,
            body: Body::None,
        })
    }

    fn op_code(&mut self, op: Op, ty: Option<Ty>, next: CodeId) -> CodeId {
        self.program.push(Node {
            op,
            ty,
            indent: self.indent,
            next: Some(next),
            body: Body::None,
        })
    }

    /// One-operation program: `[op, end]`.
    fn single(&mut self, op: Op, ty: Ty) -> CodeId {
        let end = self.end_op();
        self.op_code(op, Some(ty), end)
    }

    // ── pointer ─────────────────────────────────────────────────────────

    fn compile_ptr(&mut self, ty: Ty, root: bool, with_indent: bool) -> Result<CodeId, Error> {
        let code = self.compile(self.types.elem(ty), root, with_indent)?;
        Ok(self.optimize_struct_field_ptr_head(ty, code))
    }

    /// Head-ptr optimization: a record head can absorb one level of
    /// indirection; anything else gets an explicit `ptr` node in front.
    fn optimize_struct_field_ptr_head(&mut self, ty: Ty, code: CodeId) -> CodeId {
        let op = self.program.node(code).op;
        let ptr_head = op.head_to_ptr_head();
        if op != ptr_head {
            self.program.node_mut(code).op = ptr_head;
            return code;
        }
        self.op_code(Op::Ptr, Some(ty), code)
    }

    // ── dynamic slot ────────────────────────────────────────────────────

    fn compile_dynamic(&mut self, ty: Ty, root: bool) -> CodeId {
        let end = self.end_op();
        self.program.push(Node {
            op: Op::Dynamic,
            ty: Some(ty),
            indent: self.indent,
            next: Some(end),
            body: Body::Dynamic { root },
        })
    }

    // ── sequences ───────────────────────────────────────────────────────

    fn compile_slice(&mut self, ty: Ty, root: bool, with_indent: bool) -> Result<CodeId, Error> {
        let elem = self.types.elem(ty);
        let size = self.types.size(elem);

        self.indent += 1;
        let code = self.compile(elem, false, with_indent)?;
        self.indent -= 1;

        // header => elem program => elem marker => elem program => ...
        //                              '-- end on sequence exhaustion
        let sentinel = self.end_op();
        let end = self.op_code(Op::SliceEnd { indent: false }, None, sentinel);
        let elem_code = self.program.push(Node {
            op: Op::SliceElem {
                root: false,
                indent: false,
            },
            ty: None,
            indent: self.indent,
            next: None,
            body: Body::SliceElem { size, end },
        });
        let header = self.program.push(Node {
            op: Op::SliceHead {
                root: false,
                indent: false,
            },
            ty: None,
            indent: self.indent,
            next: None,
            body: Body::SliceHead {
                elem: elem_code,
                end,
            },
        });

        if with_indent {
            self.program.node_mut(header).op = Op::SliceHead { root, indent: true };
            self.program.node_mut(elem_code).op = Op::SliceElem { root, indent: true };
            self.program.node_mut(end).op = Op::SliceEnd { indent: true };
        }

        self.program.node_mut(header).next = Some(code);
        let tail = self.program.before_last(code);
        self.program.node_mut(tail).next = Some(elem_code);
        self.program.node_mut(elem_code).next = Some(code);
        Ok(header)
    }

    fn compile_array(&mut self, ty: Ty, with_indent: bool) -> Result<CodeId, Error> {
        let elem = self.types.elem(ty);
        let len = self.types.get(ty).len;
        let size = self.types.size(elem);

        self.indent += 1;
        let code = self.compile(elem, false, with_indent)?;
        self.indent -= 1;

        let sentinel = self.end_op();
        let end = self.op_code(Op::ArrayEnd { indent: false }, None, sentinel);
        let elem_code = self.program.push(Node {
            op: Op::ArrayElem { indent: false },
            ty: None,
            indent: self.indent,
            next: None,
            body: Body::ArrayElem { len, size, end },
        });
        let header = self.program.push(Node {
            op: Op::ArrayHead { indent: false },
            ty: None,
            indent: self.indent,
            next: None,
            body: Body::ArrayHead {
                len,
                elem: elem_code,
                end,
            },
        });

        if with_indent {
            self.program.node_mut(header).op = Op::ArrayHead { indent: true };
            self.program.node_mut(elem_code).op = Op::ArrayElem { indent: true };
            self.program.node_mut(end).op = Op::ArrayEnd { indent: true };
        }

        self.program.node_mut(header).next = Some(code);
        let tail = self.program.before_last(code);
        self.program.node_mut(tail).next = Some(elem_code);
        self.program.node_mut(elem_code).next = Some(code);
        Ok(header)
    }

    // ── mappings ────────────────────────────────────────────────────────

    fn compile_map(
        &mut self,
        ty: Ty,
        with_load: bool,
        root: bool,
        with_indent: bool,
    ) -> Result<CodeId, Error> {
        // header => key program => value marker => value program => key
        // marker => key program => ...; the key marker exits to end.
        self.indent += 1;
        let key_code = self.compile(self.types.key(ty), false, with_indent)?;
        let value_code = self.compile(self.types.elem(ty), false, with_indent)?;
        let inner = self.indent;
        self.indent -= 1;

        let sentinel = self.end_op();
        let end = self.op_code(Op::MapEnd { indent: false }, None, sentinel);
        let key = self.program.push(Node {
            op: Op::MapKey {
                root: false,
                indent: false,
            },
            ty: None,
            indent: inner,
            next: None,
            body: Body::MapKey { end },
        });
        let value = self.program.push(Node {
            op: Op::MapValue { indent: false },
            ty: None,
            indent: inner,
            next: None,
            body: Body::None,
        });
        let header = self.program.push(Node {
            op: Op::MapHead {
                load: with_load,
                root: false,
                indent: false,
            },
            ty: Some(ty),
            indent: self.indent,
            next: None,
            body: Body::MapHead {
                key,
                value,
                end,
            },
        });

        if with_indent {
            self.program.node_mut(header).op = if with_load {
                Op::MapHead {
                    load: true,
                    root: false,
                    indent: true,
                }
            } else {
                Op::MapHead {
                    load: false,
                    root,
                    indent: true,
                }
            };
            self.program.node_mut(key).op = Op::MapKey { root, indent: true };
            self.program.node_mut(value).op = Op::MapValue { indent: true };
            self.program.node_mut(end).op = Op::MapEnd { indent: true };
        }

        self.program.node_mut(header).next = Some(key_code);
        let key_tail = self.program.before_last(key_code);
        self.program.node_mut(key_tail).next = Some(value);
        self.program.node_mut(value).next = Some(value_code);
        let value_tail = self.program.before_last(value_code);
        self.program.node_mut(value_tail).next = Some(key);
        self.program.node_mut(key).next = Some(key_code);
        Ok(header)
    }

    // ── records ─────────────────────────────────────────────────────────

    fn compile_struct(
        &mut self,
        ty: Ty,
        _root: bool,
        with_indent: bool,
    ) -> Result<CodeId, Error> {
        if let Some(&slot) = self.memo.get(&(ty, with_indent)) {
            return Ok(self.recursive_code(ty, slot));
        }
        let slot = self.program.new_slot();
        self.memo.insert((ty, with_indent), slot);

        let types = self.types;
        let fields = &types.get(ty).fields;
        let mut field_idx = 0usize;
        let mut head: Option<CodeId> = None;
        let mut code: Option<CodeId> = None;
        let mut prev_field: Option<CodeId> = None;

        self.indent += 1;
        for field in fields {
            if is_ignored_struct_field(field) {
                continue;
            }
            let (key_name, omit_empty) = key_name_and_omit_empty(field);
            let value_code = self.compile(field.ty, false, with_indent)?;
            if field.anonymous {
                self.rewrite_anonymous_heads(value_code);
            }
            let key = format!("\"{key_name}\":").into_bytes();
            let field_code = self.program.push(Node {
                op: Op::StructField(FieldSpec::default()),
                ty: Some(field.ty),
                indent: self.indent,
                next: Some(value_code),
                body: Body::StructField(StructFieldBody {
                    key,
                    offset: field.offset,
                    anonymous_key: field.anonymous,
                    next_field: None,
                    end: None,
                }),
            });
            if field_idx == 0 {
                code = Some(self.struct_header(field_code, value_code, omit_empty, with_indent));
                head = Some(field_code);
            } else {
                self.program.node_mut(code.unwrap()).next = Some(field_code);
                code = Some(self.struct_field(field_code, value_code, omit_empty, with_indent));
                self.set_next_field(prev_field.unwrap(), field_code);
            }
            prev_field = Some(field_code);
            field_idx += 1;
        }
        self.indent -= 1;

        let sentinel = self.end_op();
        let struct_end = self.program.push(Node {
            op: Op::StructEnd {
                indent: with_indent,
            },
            ty: None,
            indent: self.indent,
            next: Some(sentinel),
            body: Body::StructField(StructFieldBody::default()),
        });

        if let Some(prev) = prev_field {
            self.set_next_field(prev, struct_end);
        }

        let (head, code) = match head {
            Some(head) => (head, code.unwrap()),
            None => {
                // record with no retained fields
                let head = self.program.push(Node {
                    op: Op::StructFieldHead(FieldSpec {
                        indent: with_indent,
                        ..FieldSpec::default()
                    }),
                    ty: Some(ty),
                    indent: self.indent,
                    next: None,
                    body: Body::StructField(StructFieldBody {
                        next_field: Some(struct_end),
                        ..StructFieldBody::default()
                    }),
                });
                (head, head)
            }
        };

        self.set_field_end(head, struct_end);
        self.program.node_mut(code).next = Some(struct_end);
        self.program.fill_slot(slot, head);
        Ok(head)
    }

    /// Specialize the first retained field into the record head. For the
    /// generic (aggregate-valued) heads the returned append cursor sits
    /// just before the value program's end sentinel; for scalar heads the
    /// field node itself is the cursor and the value program is bypassed.
    fn struct_header(
        &mut self,
        field_code: CodeId,
        value_code: CodeId,
        omit_empty: bool,
        with_indent: bool,
    ) -> CodeId {
        self.program.node_mut(field_code).indent -= 1;
        let value_op = self.program.node(value_code).op;
        let op = optimize_struct_header(value_op, omit_empty, with_indent);
        self.program.node_mut(field_code).op = op;
        match op {
            Op::StructFieldHead(spec) if spec.scalar.is_none() => {
                self.program.before_last(value_code)
            }
            _ => field_code,
        }
    }

    /// Same specialization for fields after the first.
    fn struct_field(
        &mut self,
        field_code: CodeId,
        value_code: CodeId,
        omit_empty: bool,
        with_indent: bool,
    ) -> CodeId {
        let value_op = self.program.node(value_code).op;
        let op = optimize_struct_field(value_op, omit_empty, with_indent);
        self.program.node_mut(field_code).op = op;
        match op {
            Op::StructField(spec) if spec.scalar.is_none() => {
                self.program.before_last(value_code)
            }
            _ => field_code,
        }
    }

    /// Inline an embedded record: rewrite its head chain to the
    /// anonymous-head family and its terminal end to the anonymous end.
    fn rewrite_anonymous_heads(&mut self, value_code: CodeId) {
        let mut code = value_code;
        loop {
            let node = self.program.node_mut(code);
            node.op = node.op.head_to_anonymous_head();
            if matches!(node.op, Op::StructEnd { .. }) {
                node.op = Op::StructAnonymousEnd;
            }
            match node.field().and_then(|body| body.next_field) {
                Some(next) => code = next,
                None => break,
            }
        }
    }

    fn recursive_code(&mut self, ty: Ty, slot: SlotId) -> CodeId {
        let end = self.end_op();
        self.program.push(Node {
            op: Op::Recursive,
            ty: Some(ty),
            indent: self.indent,
            next: Some(end),
            body: Body::Recursive { jmp: slot },
        })
    }

    fn set_next_field(&mut self, field: CodeId, next: CodeId) {
        match &mut self.program.node_mut(field).body {
            Body::StructField(body) => body.next_field = Some(next),
            _ => unreachable!("next_field on a non-field node"),
        }
    }

    fn set_field_end(&mut self, field: CodeId, end: CodeId) {
        match &mut self.program.node_mut(field).body {
            Body::StructField(body) => body.end = Some(end),
            _ => unreachable!("end on a non-field node"),
        }
    }
}

fn is_ignored_struct_field(field: &Field) -> bool {
    if !field.public && !field.anonymous {
        return true;
    }
    &*field.tag == "-"
}

/// Split the annotation: the first non-empty item overrides the key, any
/// later item may be `omitempty`.
fn key_name_and_omit_empty(field: &Field) -> (&str, bool) {
    let mut parts = field.tag.split(',');
    let mut key_name: &str = &field.name;
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            key_name = first;
        }
    }
    let omit_empty = parts.any(|opt| opt == "omitempty");
    (key_name, omit_empty)
}

fn head_scalar(op: Op) -> Option<Scalar> {
    match op {
        Op::Scalar(scalar) => Some(scalar),
        _ => None,
    }
}

fn optimize_struct_header(value_op: Op, omit_empty: bool, with_indent: bool) -> Op {
    Op::StructFieldHead(FieldSpec {
        scalar: head_scalar(value_op),
        omit_empty,
        indent: with_indent,
        ..FieldSpec::default()
    })
}

fn optimize_struct_field(value_op: Op, omit_empty: bool, with_indent: bool) -> Op {
    Op::StructField(FieldSpec {
        scalar: head_scalar(value_op),
        omit_empty,
        indent: with_indent,
        ..FieldSpec::default()
    })
}
