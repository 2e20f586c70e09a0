use crate::class_file::Serialize;
use crate::descriptors;
use crate::errors::Error;
use byteorder::WriteBytesExt;

/// Deduplicating constant pool builder
///
/// The pool keeps two things per entry: the serialized bytes (written exactly once, into an
/// append-only buffer, at the moment the entry is first interned) and a node in a bucket-chained
/// hash table used to answer "has a structurally equal entry been interned before?". Interning is
/// idempotent: asking for the same logical constant twice always yields the same index and writes
/// no new bytes.
///
/// Bootstrap methods for `invokedynamic` are deduplicated through the same hash table, but their
/// serialized form goes into a separate buffer: they live in the `BootstrapMethods` attribute,
/// not the constant pool proper.
pub struct ConstantPool {
    /// Serialized pool entries, in interning order (tag byte + payload each)
    buffer: Vec<u8>,

    /// Index that the next interned entry will receive
    ///
    /// Starts at 1; `Long` and `Double` advance it by 2 (the unusable phantom slot is a quirk of
    /// the class file format).
    next_index: u16,

    /// Bucket-chained hash table over all interned entries
    items: Vec<Option<Box<Item>>>,

    /// Number of chained items (not index slots)
    item_count: usize,

    /// When `item_count` passes this, the table is rehashed into `2 * capacity + 1` buckets
    threshold: usize,

    /// Serialized bootstrap method entries, in interning order
    bootstrap_buffer: Vec<u8>,

    /// Number of interned bootstrap methods
    bootstrap_count: u16,
}

struct Item {
    /// Content-derived hash, stable across resizes (rehashing reuses it instead of recomputing)
    hash: u32,

    /// Pool index for regular constants, `BootstrapMethods` attribute index for bootstrap entries
    index: u16,

    constant: Constant,

    next: Option<Box<Item>>,
}

/// Initial bucket count; grows through the `2n + 1` sequence
const INITIAL_CAPACITY: usize = 257;

impl ConstantPool {
    /// Make a fresh empty constant pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            buffer: vec![],
            next_index: 1,
            items: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            item_count: 0,
            threshold: INITIAL_CAPACITY * 3 / 4,
            bootstrap_buffer: vec![],
            bootstrap_count: 0,
        }
    }

    /// Number of index slots consumed so far, plus one (the `constant_pool_count` header field)
    pub fn count(&self) -> u16 {
        self.next_index
    }

    /// Number of distinct entries interned (phantom slots of 8-byte constants not included)
    pub fn entry_count(&self) -> usize {
        self.item_count - self.bootstrap_count as usize
    }

    /// Number of interned bootstrap methods
    pub fn bootstrap_method_count(&self) -> u16 {
        self.bootstrap_count
    }

    fn find(&self, hash: u32, constant: &Constant) -> Option<u16> {
        let mut link = &self.items[hash as usize % self.items.len()];
        while let Some(item) = link {
            if item.hash == hash && item.constant == *constant {
                return Some(item.index);
            }
            link = &item.next;
        }
        None
    }

    /// Chain a new item into its bucket, resizing first if the load threshold was reached
    fn chain(&mut self, hash: u32, index: u16, constant: Constant) {
        if self.item_count + 1 > self.threshold {
            let new_capacity = self.items.len() * 2 + 1;
            let mut new_items: Vec<Option<Box<Item>>> =
                (0..new_capacity).map(|_| None).collect();
            for bucket in self.items.iter_mut() {
                let mut link = bucket.take();
                while let Some(mut item) = link {
                    link = item.next.take();
                    let new_bucket = &mut new_items[item.hash as usize % new_capacity];
                    item.next = new_bucket.take();
                    *new_bucket = Some(item);
                }
            }
            self.items = new_items;
            self.threshold = new_capacity * 3 / 4;
        }

        let capacity = self.items.len();
        let bucket = &mut self.items[hash as usize % capacity];
        let item = Box::new(Item {
            hash,
            index,
            constant,
            next: bucket.take(),
        });
        *bucket = Some(item);
        self.item_count += 1;
    }

    /// Get or insert a constant, serializing it into the pool buffer on first sight
    fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let hash = constant.hash_code();
        if let Some(index) = self.find(hash, &constant) {
            return Ok(ConstantIndex(index));
        }

        let index = self.next_index;
        let next_index = index as u32 + constant.width() as u32;
        if next_index > u16::MAX as u32 {
            return Err(Error::ConstantPoolOverflow { constant });
        }

        constant.serialize(&mut self.buffer)?;
        self.next_index = next_index as u16;
        self.chain(hash, index, constant);
        Ok(ConstantIndex(index))
    }

    /// Get or insert a utf8 constant
    pub fn intern_utf8(&mut self, value: &str) -> Result<Utf8ConstantIndex, Error> {
        Ok(Utf8ConstantIndex(
            self.intern(Constant::Utf8(value.to_owned()))?,
        ))
    }

    /// Get or insert a class constant
    ///
    /// The name must be in internal form (`java/lang/Object`) or an array descriptor.
    pub fn intern_class(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        let name_index = self.intern_utf8(name)?;
        Ok(ClassConstantIndex(
            self.intern(Constant::Class(name_index))?,
        ))
    }

    /// Get or insert a `java.lang.String` constant
    pub fn intern_string(&mut self, value: &str) -> Result<StringConstantIndex, Error> {
        let value_index = self.intern_utf8(value)?;
        Ok(StringConstantIndex(
            self.intern(Constant::String(value_index))?,
        ))
    }

    /// Get or insert an `int` constant
    pub fn intern_integer(&mut self, value: i32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Integer(value))
    }

    /// Get or insert a `float` constant
    ///
    /// Deduplication is on the raw bits, so NaN payloads and signed zeros stay distinct.
    pub fn intern_float(&mut self, value: f32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Float(value.to_bits()))
    }

    /// Get or insert a `long` constant (consumes two index slots)
    pub fn intern_long(&mut self, value: i64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Long(value))
    }

    /// Get or insert a `double` constant (consumes two index slots)
    pub fn intern_double(&mut self, value: f64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Double(value.to_bits()))
    }

    /// Get or insert a name & type constant
    pub fn intern_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        Ok(NameAndTypeConstantIndex(self.intern(
            Constant::NameAndType {
                name: name_index,
                descriptor: descriptor_index,
            },
        )?))
    }

    /// Get or insert a field reference
    pub fn intern_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        descriptors::check_field_descriptor(descriptor)?;
        let class_index = self.intern_class(class)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        Ok(FieldRefConstantIndex(self.intern(Constant::FieldRef(
            class_index,
            name_and_type,
        ))?))
    }

    /// Get or insert a method reference (`is_interface` selects between the `Methodref` and
    /// `InterfaceMethodref` tags)
    pub fn intern_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        descriptors::check_method_descriptor(descriptor)?;
        let class_index = self.intern_class(class)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        Ok(MethodRefConstantIndex(self.intern(Constant::MethodRef {
            class: class_index,
            name_and_type,
            is_interface,
        })?))
    }

    /// Get or insert a method handle constant
    ///
    /// Depending on the handle kind, `member` must be a field reference (for the field access
    /// kinds) or a method reference (for the invoke kinds).
    pub fn intern_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, Error> {
        self.intern(Constant::MethodHandle {
            handle_kind,
            member,
        })
    }

    /// Get or insert a method type constant
    pub fn intern_method_type(&mut self, descriptor: &str) -> Result<ConstantIndex, Error> {
        descriptors::check_method_descriptor(descriptor)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        self.intern(Constant::MethodType {
            descriptor: descriptor_index,
        })
    }

    /// Get or insert an invoke dynamic constant
    ///
    /// `bootstrap_method` is an index into the `BootstrapMethods` attribute, as returned by
    /// [`Self::intern_bootstrap_method`].
    pub fn intern_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        descriptors::check_method_descriptor(descriptor)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        Ok(InvokeDynamicConstantIndex(self.intern(
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor: name_and_type,
            },
        )?))
    }

    /// Get or insert a bootstrap method entry, returning its index in the `BootstrapMethods`
    /// attribute
    pub fn intern_bootstrap_method(
        &mut self,
        method_handle: ConstantIndex,
        arguments: Vec<ConstantIndex>,
    ) -> Result<u16, Error> {
        let constant = Constant::BootstrapMethod {
            method_handle,
            arguments,
        };
        let hash = constant.hash_code();
        if let Some(index) = self.find(hash, &constant) {
            return Ok(index);
        }

        let index = self.bootstrap_count;
        constant.serialize(&mut self.bootstrap_buffer)?;
        self.bootstrap_count += 1;
        self.chain(hash, index, constant);
        Ok(index)
    }

    /// Serialized body of the `BootstrapMethods` attribute (count followed by the entries)
    pub(crate) fn bootstrap_methods_info(&self) -> Vec<u8> {
        let mut info = Vec::with_capacity(2 + self.bootstrap_buffer.len());
        info.extend_from_slice(&self.bootstrap_count.to_be_bytes());
        info.extend_from_slice(&self.bootstrap_buffer);
        info
    }

    /// Build an attribute, interning its name into this pool
    pub fn make_attribute<A: crate::class_file::AttributeLike>(
        &mut self,
        attribute: A,
    ) -> Result<crate::class_file::Attribute, Error> {
        let name_index = self.intern_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(crate::class_file::Attribute { name_index, info })
    }
}

impl Default for ConstantPool {
    fn default() -> ConstantPool {
        ConstantPool::new()
    }
}

/// Serializes as `constant_pool_count` followed by the entries
impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.next_index.serialize(writer)?;
        writer.write_all(&self.buffer)?;
        Ok(())
    }
}

/// Constants as in the constant pool
///
/// Note: some constant kinds added after Java 8 (`Dynamic`, `Module`, `Package`) are not included
/// since this writer never produces them.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the null character
    /// `\u{0000}` and of supplementary characters is different).
    Utf8(String),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`, kept as raw bits so that NaN payloads and signed
    /// zeros deduplicate structurally
    Float(u32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`, kept as raw bits (see `Float`)
    Double(u64),

    /// Class or interface
    Class(Utf8ConstantIndex),

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the handle kind, this points to different things:
        ///
        ///   - a field ref for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - a method ref for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Entry of the `BootstrapMethods` attribute
    ///
    /// Not a real pool entry: it shares the deduplication table but is serialized into the
    /// attribute buffer and consumes no pool index.
    BootstrapMethod {
        method_handle: ConstantIndex,
        arguments: Vec<ConstantIndex>,
    },
}

impl Constant {
    /// Number of pool index slots the constant occupies
    ///
    /// Quoting the spec:
    ///
    /// > All 8-byte constants take up two entries in the constant_pool table of the class file.
    /// > [...] In retrospect, making 8-byte constants take two constant pool entries was a poor
    /// > choice.
    pub fn width(&self) -> u8 {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            Constant::BootstrapMethod { .. } => 0,
            _ => 1,
        }
    }

    /// Content-derived hash for the deduplication table
    ///
    /// Stable across resizes, so rehashing reuses stored values instead of recomputing them.
    fn hash_code(&self) -> u32 {
        fn mix(tag: u8, parts: &[u32]) -> u32 {
            let mut hash = tag as u32;
            for part in parts {
                hash = hash.wrapping_mul(31).wrapping_add(*part);
            }
            hash & 0x7FFF_FFFF
        }

        match self {
            Constant::Utf8(value) => {
                let chars = value
                    .chars()
                    .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
                mix(1, &[chars])
            }
            Constant::Integer(value) => mix(3, &[*value as u32]),
            Constant::Float(bits) => mix(4, &[*bits]),
            Constant::Long(value) => mix(5, &[*value as u32, (*value >> 32) as u32]),
            Constant::Double(bits) => mix(6, &[*bits as u32, (*bits >> 32) as u32]),
            Constant::Class(name) => mix(7, &[name.0 .0 as u32]),
            Constant::String(value) => mix(8, &[value.0 .0 as u32]),
            Constant::FieldRef(class, name_and_type) => {
                mix(9, &[class.0 .0 as u32, name_and_type.0 .0 as u32])
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => mix(
                if *is_interface { 11 } else { 10 },
                &[class.0 .0 as u32, name_and_type.0 .0 as u32],
            ),
            Constant::NameAndType { name, descriptor } => {
                mix(12, &[name.0 .0 as u32, descriptor.0 .0 as u32])
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => mix(15, &[*handle_kind as u32, member.0 as u32]),
            Constant::MethodType { descriptor } => mix(16, &[descriptor.0 .0 as u32]),
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => mix(18, &[*bootstrap_method as u32, method_descriptor.0 .0 as u32]),
            Constant::BootstrapMethod {
                method_handle,
                arguments,
            } => {
                let mut parts = vec![method_handle.0 as u32];
                parts.extend(arguments.iter().map(|arg| arg.0 as u32));
                mix(64, &parts)
            }
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(value) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(value);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(value) => {
                3u8.serialize(writer)?;
                value.serialize(writer)?;
            }
            Constant::Float(bits) => {
                4u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Long(value) => {
                5u8.serialize(writer)?;
                value.serialize(writer)?;
            }
            Constant::Double(bits) => {
                6u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(value) => {
                8u8.serialize(writer)?;
                value.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if *is_interface { 11u8 } else { 10u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                (*handle_kind as u8).serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::BootstrapMethod {
                method_handle,
                arguments,
            } => {
                // No tag: this is the `bootstrap_methods[]` entry layout of the attribute
                method_handle.serialize(writer)?;
                arguments.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Kind of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

/// Index of an arbitrary entry in the constant pool (1-based)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

macro_rules! typed_constant_index {
    ($($(#[$docs:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$docs])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )+
    };
}

typed_constant_index! {
    /// Index of a `CONSTANT_Utf8_info` entry
    Utf8ConstantIndex,
    /// Index of a `CONSTANT_Class_info` entry
    ClassConstantIndex,
    /// Index of a `CONSTANT_String_info` entry
    StringConstantIndex,
    /// Index of a `CONSTANT_NameAndType_info` entry
    NameAndTypeConstantIndex,
    /// Index of a `CONSTANT_Fieldref_info` entry
    FieldRefConstantIndex,
    /// Index of a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info` entry
    MethodRefConstantIndex,
    /// Index of a `CONSTANT_InvokeDynamic_info` entry
    InvokeDynamicConstantIndex,
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u{0000}` is encoded in 2-byte format rather than 1-byte, so that the
/// >    encoded strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        let code: u32 = c as u32;

        // The null character gets the 2-byte format; everything else follows its UTF-8 length
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: encoded as a surrogate pair, the main divergence
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}
