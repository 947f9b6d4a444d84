use rustc_hash::FxHashMap;

/// Handle to a registered type. Identity (not structure) is what the
/// compiler memoizes on, so two separately registered records are distinct
/// schemas even when their fields agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ty(pub(crate) u32);

/// The kind of a registered type.
///
/// `Int`, `Uint` and `Uintptr` are pointer-sized; the suffixed variants are
/// fixed-width. `Dyn` is a slot whose concrete schema is only known at
/// encode time. `Func` exists so the registry can describe layouts that
/// contain function pointers; the compiler rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
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
    Uintptr,
    Float32,
    Float64,
    Bool,
    String,
    Ptr,
    Slice,
    Array,
    Map,
    Struct,
    Dyn,
    Func,
}

/// One record field, in declaration order.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: Box<str>,
    /// Byte offset within the record, filled in at registration.
    pub offset: usize,
    pub ty: Ty,
    /// Embedded record whose fields are inlined into the enclosing record.
    pub anonymous: bool,
    /// Non-public, non-anonymous fields are skipped by the compiler.
    pub public: bool,
    /// Comma-separated annotation: first item overrides the JSON key,
    /// later items may include `omitempty`. The literal tag `-` drops the
    /// field entirely.
    pub tag: Box<str>,
}

impl Field {
    pub fn new(name: &str, ty: Ty) -> Self {
        Field {
            name: name.into(),
            offset: 0,
            ty,
            anonymous: false,
            public: true,
            tag: "".into(),
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.public = false;
        self
    }
}

/// Full description of one registered type.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub kind: Kind,
    /// Record name, used in diagnostics.
    pub name: Option<Box<str>>,
    /// Pointee, sequence element, or map value.
    pub elem: Option<Ty>,
    /// Map key.
    pub key: Option<Ty>,
    /// Fixed-array length.
    pub len: usize,
    /// Byte stride of a value of this type.
    pub size: usize,
    pub fields: Vec<Field>,
    /// The type provides its own raw JSON through a registered marshaler.
    pub marshal_json: bool,
    /// The type provides its own text form through a registered marshaler.
    pub marshal_text: bool,
    /// A pointer to the type consumes raw JSON through a registered
    /// unmarshaler.
    pub unmarshal_json: bool,
}

impl TypeDesc {
    fn leaf(kind: Kind, size: usize) -> Self {
        TypeDesc {
            kind,
            name: None,
            elem: None,
            key: None,
            len: 0,
            size,
            fields: Vec::new(),
            marshal_json: false,
            marshal_text: false,
            unmarshal_json: false,
        }
    }
}

const PTR_SIZE: usize = 8;
/// Raw slice headers are three pointer-sized words.
const SLICE_HEADER_SIZE: usize = 24;

fn scalar_size(kind: Kind) -> usize {
    match kind {
        Kind::Int8 | Kind::Uint8 | Kind::Bool => 1,
        Kind::Int16 | Kind::Uint16 => 2,
        Kind::Int32 | Kind::Uint32 | Kind::Float32 => 4,
        Kind::Int
        | Kind::Int64
        | Kind::Uint
        | Kind::Uint64
        | Kind::Uintptr
        | Kind::Float64 => 8,
        Kind::String | Kind::Dyn => 16,
        Kind::Ptr | Kind::Map | Kind::Func => PTR_SIZE,
        Kind::Slice => SLICE_HEADER_SIZE,
        Kind::Array | Kind::Struct => panic!("{kind:?} has no intrinsic size"),
    }
}

fn align_for(size: usize) -> usize {
    match size {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Registry of type descriptors. All `Ty` handles are indices into one
/// `Types` instance; mixing handles across registries is a logic error.
#[derive(Debug, Default)]
pub struct Types {
    defs: Vec<TypeDesc>,
    scalars: FxHashMap<Kind, Ty>,
}

impl Types {
    pub fn new() -> Self {
        Types::default()
    }

    fn push(&mut self, desc: TypeDesc) -> Ty {
        let ty = Ty(self.defs.len() as u32);
        self.defs.push(desc);
        ty
    }

    pub fn get(&self, ty: Ty) -> &TypeDesc {
        &self.defs[ty.0 as usize]
    }

    fn get_mut(&mut self, ty: Ty) -> &mut TypeDesc {
        &mut self.defs[ty.0 as usize]
    }

    pub fn kind(&self, ty: Ty) -> Kind {
        self.get(ty).kind
    }

    pub fn size(&self, ty: Ty) -> usize {
        self.get(ty).size
    }

    /// Pointee, sequence element, or map value type.
    pub fn elem(&self, ty: Ty) -> Ty {
        self.get(ty).elem.expect("type has no element")
    }

    /// Map key type.
    pub fn key(&self, ty: Ty) -> Ty {
        self.get(ty).key.expect("type has no key")
    }

    /// Register (or return the interned handle of) a scalar kind.
    pub fn scalar(&mut self, kind: Kind) -> Ty {
        if let Some(&ty) = self.scalars.get(&kind) {
            return ty;
        }
        let ty = self.push(TypeDesc::leaf(kind, scalar_size(kind)));
        self.scalars.insert(kind, ty);
        ty
    }

    pub fn ptr(&mut self, elem: Ty) -> Ty {
        let mut desc = TypeDesc::leaf(Kind::Ptr, PTR_SIZE);
        desc.elem = Some(elem);
        self.push(desc)
    }

    pub fn slice(&mut self, elem: Ty) -> Ty {
        let mut desc = TypeDesc::leaf(Kind::Slice, SLICE_HEADER_SIZE);
        desc.elem = Some(elem);
        self.push(desc)
    }

    pub fn array(&mut self, elem: Ty, len: usize) -> Ty {
        let size = self.size(elem) * len;
        let mut desc = TypeDesc::leaf(Kind::Array, size);
        desc.elem = Some(elem);
        desc.len = len;
        self.push(desc)
    }

    pub fn map(&mut self, key: Ty, value: Ty) -> Ty {
        let mut desc = TypeDesc::leaf(Kind::Map, PTR_SIZE);
        desc.key = Some(key);
        desc.elem = Some(value);
        self.push(desc)
    }

    pub fn dynamic(&mut self) -> Ty {
        self.push(TypeDesc::leaf(Kind::Dyn, scalar_size(Kind::Dyn)))
    }

    pub fn func(&mut self) -> Ty {
        self.push(TypeDesc::leaf(Kind::Func, PTR_SIZE))
    }

    /// Register a record, computing field offsets with a C-style layout.
    pub fn record(&mut self, name: &str, fields: Vec<Field>) -> Ty {
        let ty = self.declare(name);
        self.define_record(ty, fields);
        ty
    }

    /// Forward-declare a record so self-referential schemas can be built;
    /// complete it with [`Types::define_record`].
    pub fn declare(&mut self, name: &str) -> Ty {
        let mut desc = TypeDesc::leaf(Kind::Struct, 0);
        desc.name = Some(name.into());
        desc.size = 0;
        self.push(desc)
    }

    pub fn define_record(&mut self, ty: Ty, mut fields: Vec<Field>) {
        assert_eq!(self.kind(ty), Kind::Struct, "define_record on non-record");
        let mut offset = 0usize;
        let mut max_align = 1usize;
        for field in &mut fields {
            let size = self.size(field.ty);
            let align = align_for(size);
            offset = align_up(offset, align);
            field.offset = offset;
            offset += size;
            max_align = max_align.max(align);
        }
        let size = align_up(offset, max_align);
        let desc = self.get_mut(ty);
        desc.fields = fields;
        desc.size = size;
    }

    pub fn mark_marshal_json(&mut self, ty: Ty) {
        self.get_mut(ty).marshal_json = true;
    }

    pub fn mark_marshal_text(&mut self, ty: Ty) {
        self.get_mut(ty).marshal_text = true;
    }

    pub fn mark_unmarshal_json(&mut self, ty: Ty) {
        self.get_mut(ty).unmarshal_json = true;
    }

    /// Diagnostic rendering of a type, e.g. `[i64]`, `*Node`,
    /// `map<string, i64>`.
    pub fn display(&self, ty: Ty) -> String {
        let desc = self.get(ty);
        match desc.kind {
            Kind::Int => "isize".into(),
            Kind::Int8 => "i8".into(),
            Kind::Int16 => "i16".into(),
            Kind::Int32 => "i32".into(),
            Kind::Int64 => "i64".into(),
            Kind::Uint => "usize".into(),
            Kind::Uint8 => "u8".into(),
            Kind::Uint16 => "u16".into(),
            Kind::Uint32 => "u32".into(),
            Kind::Uint64 => "u64".into(),
            Kind::Uintptr => "uptr".into(),
            Kind::Float32 => "f32".into(),
            Kind::Float64 => "f64".into(),
            Kind::Bool => "bool".into(),
            Kind::String => "string".into(),
            Kind::Ptr => format!("*{}", self.display(self.elem(ty))),
            Kind::Slice => format!("[{}]", self.display(self.elem(ty))),
            Kind::Array => format!("[{}; {}]", self.display(self.elem(ty)), desc.len),
            Kind::Map => format!(
                "map<{}, {}>",
                self.display(self.key(ty)),
                self.display(self.elem(ty))
            ),
            Kind::Struct => desc
                .name
                .as_deref()
                .map(str::to_owned)
                .unwrap_or_else(|| "struct".into()),
            Kind::Dyn => "dyn".into(),
            Kind::Func => "fn".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_packs_with_alignment() {
        let mut types = Types::new();
        let b = types.scalar(Kind::Bool);
        let i = types.scalar(Kind::Int);
        let ty = types.record(
            "Mixed",
            vec![Field::new("flag", b), Field::new("count", i)],
        );
        let desc = types.get(ty);
        assert_eq!(desc.fields[0].offset, 0);
        assert_eq!(desc.fields[1].offset, 8);
        assert_eq!(desc.size, 16);
    }

    #[test]
    fn scalars_are_interned() {
        let mut types = Types::new();
        assert_eq!(types.scalar(Kind::Int), types.scalar(Kind::Int));
        assert_ne!(types.scalar(Kind::Int), types.scalar(Kind::Int64));
    }

    #[test]
    fn display_nested() {
        let mut types = Types::new();
        let i = types.scalar(Kind::Int);
        let s = types.slice(i);
        let p = types.ptr(s);
        assert_eq!(types.display(p), "*[isize]");
    }
}
