//! Top-level class assembly
//!
//! [`ClassBuilder`] owns the constant pool and collects interfaces, fields and methods until the
//! whole class is serialized in one pass. Method bodies are built separately through
//! [`MethodBody`] and handed back when complete, so several can be under construction against the
//! same pool.

use byteorder::WriteBytesExt;

use crate::class_file::{
    Attribute, ClassAccessFlags, ClassConstantIndex, Code, ConstantIndex, ConstantPool,
    ConstantValue, Exceptions, Field, FieldAccessFlags, Method, MethodAccessFlags, Serialize,
    SourceFile, Utf8ConstantIndex, Version,
};
use crate::code::{ComputeMode, MethodBody};
use crate::descriptors;
use crate::errors::Error;

const MAGIC: u32 = 0xCAFE_BABE;

pub struct ClassBuilder {
    version: Version,
    compute: ComputeMode,
    pool: ConstantPool,
    access_flags: ClassAccessFlags,
    this_class: ClassConstantIndex,
    this_class_name: String,

    /// `None` only for `java/lang/Object`, which has no superclass
    super_class: Option<ClassConstantIndex>,

    interfaces: Vec<ClassConstantIndex>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    attributes: Vec<Attribute>,
}

impl ClassBuilder {
    pub fn new(
        version: Version,
        compute: ComputeMode,
        access_flags: ClassAccessFlags,
        this_class: &str,
        super_class: Option<&str>,
    ) -> Result<ClassBuilder, Error> {
        let mut pool = ConstantPool::new();
        let this_class_index = pool.intern_class(this_class)?;
        let super_class_index = match super_class {
            Some(name) => Some(pool.intern_class(name)?),
            None => None,
        };
        Ok(ClassBuilder {
            version,
            compute,
            pool,
            access_flags,
            this_class: this_class_index,
            this_class_name: this_class.to_owned(),
            super_class: super_class_index,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        })
    }

    /// The pool backing this class, for interning constants used by method bodies
    pub fn constants(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn add_interface(&mut self, name: &str) -> Result<(), Error> {
        let interface = self.pool.intern_class(name)?;
        self.interfaces.push(interface);
        Ok(())
    }

    /// Add a field, optionally with a `ConstantValue` initializer (static finals)
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        constant_value: Option<ConstantIndex>,
    ) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        descriptors::check_field_descriptor(descriptor)?;

        let name_index = self.pool.intern_utf8(name)?;
        let descriptor_index = self.pool.intern_utf8(descriptor)?;
        let mut attributes = vec![];
        if let Some(value) = constant_value {
            attributes.push(self.pool.make_attribute(ConstantValue(value))?);
        }
        self.fields.push(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    /// Begin a method body; hand it back through [`finish_method`](Self::finish_method)
    pub fn start_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodBody, Error> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        descriptors::check_method_descriptor(descriptor)?;
        Ok(MethodBody::new(
            self.compute,
            &self.this_class_name,
            access_flags,
            name,
            descriptor,
        ))
    }

    /// Seal a method body into the class
    ///
    /// The declared maxima matter only when the builder was created with
    /// [`ComputeMode::PassThrough`]; `throws` lists checked exception class names.
    pub fn finish_method(
        &mut self,
        body: MethodBody,
        declared_max_stack: u16,
        declared_max_locals: u16,
        throws: &[&str],
    ) -> Result<(), Error> {
        let access_flags = body.access_flags;
        let name_index = self.pool.intern_utf8(&body.method_name)?;
        let descriptor_index = self.pool.intern_utf8(&body.descriptor)?;

        let code = body.finish(declared_max_stack, declared_max_locals, &mut self.pool)?;
        let mut attributes = vec![self.pool.make_attribute(code)?];
        self.push_exceptions_attribute(&mut attributes, throws)?;

        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    /// Add an `abstract` or `native` method, which carries no `Code` attribute
    pub fn add_method_without_code(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        throws: &[&str],
    ) -> Result<(), Error> {
        descriptors::check_method_descriptor(descriptor)?;
        let name_index = self.pool.intern_utf8(name)?;
        let descriptor_index = self.pool.intern_utf8(descriptor)?;
        let mut attributes = vec![];
        self.push_exceptions_attribute(&mut attributes, throws)?;
        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    /// Copy-through fast path: splice an already-encoded method body verbatim
    ///
    /// The bytes must already be valid against this class's pool (branch offsets final, constant
    /// indices remapped). No label, stack or frame processing runs over them.
    pub fn add_raw_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Result<(), Error> {
        descriptors::check_method_descriptor(descriptor)?;
        if code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow { length: code.len() });
        }
        let name_index = self.pool.intern_utf8(name)?;
        let descriptor_index = self.pool.intern_utf8(descriptor)?;
        let code = Code {
            max_stack,
            max_locals,
            code_array: crate::class_file::BytecodeArray(code),
            exception_table: vec![],
            attributes: vec![],
        };
        let attributes = vec![self.pool.make_attribute(code)?];
        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    pub fn source_file(&mut self, name: &str) -> Result<(), Error> {
        let name_index: Utf8ConstantIndex = self.pool.intern_utf8(name)?;
        let attribute = self.pool.make_attribute(SourceFile(name_index))?;
        self.attributes.push(attribute);
        Ok(())
    }

    /// Serialize the class file into `writer`
    pub fn serialize_into<W: WriteBytesExt>(mut self, writer: &mut W) -> Result<(), Error> {
        // The pool must not change after its bytes go out, so assemble the attribute that reads
        // back out of it first
        if self.pool.bootstrap_method_count() > 0 {
            let name_index = self.pool.intern_utf8("BootstrapMethods")?;
            let info = self.pool.bootstrap_methods_info();
            self.attributes.push(Attribute { name_index, info });
        }

        log::debug!(
            "serializing class {} ({} constants, {} methods)",
            self.this_class_name,
            self.pool.count(),
            self.methods.len(),
        );

        MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.pool.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            Some(super_class) => super_class.serialize(writer)?,
            None => 0u16.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }

    /// Serialize the class file to an owned byte vector
    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize_into(&mut bytes)?;
        Ok(bytes)
    }

    fn push_exceptions_attribute(
        &mut self,
        attributes: &mut Vec<Attribute>,
        throws: &[&str],
    ) -> Result<(), Error> {
        if throws.is_empty() {
            return Ok(());
        }
        let mut thrown = Vec::with_capacity(throws.len());
        for class in throws {
            thrown.push(self.pool.intern_class(class)?);
        }
        attributes.push(self.pool.make_attribute(Exceptions(thrown))?);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};
    use crate::code::opcodes;

    fn empty_class() -> ClassBuilder {
        ClassBuilder::new(
            Version::JAVA8,
            ComputeMode::MaxsOnly,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            "demo/Empty",
            Some("java/lang/Object"),
        )
        .unwrap()
    }

    #[test]
    fn header_layout() {
        let bytes = empty_class().into_bytes().unwrap();
        assert_eq!(BigEndian::read_u32(&bytes[0..4]), 0xCAFE_BABE);
        assert_eq!(BigEndian::read_u16(&bytes[4..6]), 0); // minor
        assert_eq!(BigEndian::read_u16(&bytes[6..8]), 52); // major (Java 8)
        // Entries: 2 class + 2 utf8 names, so the 1-based count is 5
        assert_eq!(BigEndian::read_u16(&bytes[8..10]), 5);
    }

    #[test]
    fn object_has_no_super_class() {
        let builder = ClassBuilder::new(
            Version::JAVA8,
            ComputeMode::MaxsOnly,
            ClassAccessFlags::PUBLIC,
            "java/lang/Object",
            None,
        )
        .unwrap();
        let bytes = builder.into_bytes().unwrap();
        // access, this, super are the last three u16 before the interface count
        let tail = &bytes[bytes.len() - 10..];
        let super_index = BigEndian::read_u16(&tail[4..6]);
        assert_eq!(super_index, 0);
    }

    #[test]
    fn method_round_trip() {
        let mut builder = empty_class();
        let mut body = builder
            .start_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "answer",
                "()I",
            )
            .unwrap();
        body.push_int_insn(opcodes::BIPUSH, 42);
        body.push_insn(opcodes::IRETURN);
        builder.finish_method(body, 0, 0, &[]).unwrap();

        let bytes = builder.into_bytes().unwrap();
        // The bytecode appears exactly once in the output
        let needle = [opcodes::BIPUSH, 42, opcodes::IRETURN];
        let found = bytes
            .windows(needle.len())
            .filter(|window| **window == needle)
            .count();
        assert_eq!(found, 1);
    }

    #[test]
    fn bad_method_descriptor_is_rejected() {
        let mut builder = empty_class();
        match builder.start_method(MethodAccessFlags::PUBLIC, "m", "(I") {
            Err(Error::InvalidDescriptor(descriptor)) => assert_eq!(descriptor, "(I"),
            other => panic!("expected invalid descriptor, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bootstrap_methods_attribute_appears_on_demand() {
        let mut builder = empty_class();
        let without = empty_class().into_bytes().unwrap();
        assert!(!contains(&without, b"BootstrapMethods"));

        let pool = builder.constants();
        let handle = pool.intern_method_ref("demo/Fac", "make", "()V", false).unwrap();
        let handle = pool
            .intern_method_handle(crate::class_file::HandleKind::InvokeStatic, handle.into())
            .unwrap();
        let bootstrap = pool.intern_bootstrap_method(handle, vec![]).unwrap();
        pool.intern_invoke_dynamic(bootstrap, "apply", "()V").unwrap();

        let with = builder.into_bytes().unwrap();
        assert!(contains(&with, b"BootstrapMethods"));
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }
}
