//! Typed handles over packed resource ids.

use core::fmt;

use reef_core::ResourceId;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) ResourceId);

        impl $name {
            /// Underlying packed id.
            pub const fn resource(self) -> ResourceId {
                self.0
            }

            pub const fn raw(self) -> u32 {
                self.0.raw()
            }

            /// Handle for a raw id handed out earlier, e.g. one stored by
            /// the application as an integer.
            pub const fn from_raw(raw: u32) -> Self {
                Self(ResourceId::from_raw(raw))
            }
        }

        impl From<$name> for ResourceId {
            fn from(handle: $name) -> Self {
                handle.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

handle!(
    /// Handle of a thread control block.
    ThreadId
);
handle!(
    /// Handle of a timer resource.
    TimerId
);
handle!(
    /// Handle of an event control block.
    EventId
);
