use crate::class_file::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which the VM checks before anything else to make sure it has the
/// features needed to interpret the rest of the file
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// Class file version corresponding to Java SE 6
    ///
    /// This is the last version on which `jsr`/`ret` are accepted and stack map frames are
    /// optional.
    pub const JAVA6: Version = Version {
        minor_version: 0,
        major_version: 50,
    };

    /// Class file version corresponding to Java SE 7 (frames become mandatory)
    pub const JAVA7: Version = Version {
        minor_version: 0,
        major_version: 51,
    };

    /// Class file version corresponding to Java SE 8
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };

    /// Class file version corresponding to Java SE 11
    pub const JAVA11: Version = Version {
        minor_version: 0,
        major_version: 55,
    };
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
