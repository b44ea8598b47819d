//! Object Types
//!
//! Every object header carries a type tag. The tag is informational: the
//! object manager treats all types identically, and type-specific teardown
//! is supplied per object through its destroy routine rather than through a
//! per-type callback table.

use core::fmt;

/// Kernel object types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum ObjectType {
    /// Namespace directory (the root is one)
    Directory = 1,
    /// Queued lock
    QueuedLock = 2,
    /// Event
    Event = 3,
    /// Process
    Process = 4,
    /// Thread
    Thread = 5,
    /// Driver
    Driver = 6,
    /// Device
    Device = 7,
    /// I/O request packet
    Irp = 8,
    /// Device interface
    Interface = 9,
    /// Instance of a device interface
    InterfaceInstance = 10,
    /// Listener for device interface arrival
    InterfaceListener = 11,
    /// Mounted volume
    Volume = 12,
    /// Image section
    ImageSection = 13,
    /// Pipe
    Pipe = 14,
    /// Timer
    Timer = 15,
    /// Terminal master side
    TerminalMaster = 16,
    /// Terminal slave side
    TerminalSlave = 17,
    /// Shared memory object
    SharedMemoryObject = 18,
}

impl ObjectType {
    /// Display name of the type
    pub const fn name(self) -> &'static str {
        match self {
            ObjectType::Directory => "Directory",
            ObjectType::QueuedLock => "QueuedLock",
            ObjectType::Event => "Event",
            ObjectType::Process => "Process",
            ObjectType::Thread => "Thread",
            ObjectType::Driver => "Driver",
            ObjectType::Device => "Device",
            ObjectType::Irp => "Irp",
            ObjectType::Interface => "Interface",
            ObjectType::InterfaceInstance => "InterfaceInstance",
            ObjectType::InterfaceListener => "InterfaceListener",
            ObjectType::Volume => "Volume",
            ObjectType::ImageSection => "ImageSection",
            ObjectType::Pipe => "Pipe",
            ObjectType::Timer => "Timer",
            ObjectType::TerminalMaster => "TerminalMaster",
            ObjectType::TerminalSlave => "TerminalSlave",
            ObjectType::SharedMemoryObject => "SharedMemoryObject",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
