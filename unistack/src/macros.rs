// Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)*
        }
    ) => {
        enum_with_unknown! {
            $( #[$enum_attr] )*
            pub doc enum $name($ty) {
                $( #[doc(hidden)] $variant = $value ),+
            }
        }
    };
    (
        $( #[$enum_attr:meta] )*
        pub doc enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )+
              $variant:ident = $value:expr $(,)*
            ),+
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

#[cfg(feature = "log")]
#[macro_use]
mod log {
    macro_rules! net_log {
        (trace, $($arg:expr),*) => {{ trace!($($arg),*); }};
        (debug, $($arg:expr),*) => {{ debug!($($arg),*); }};
        (warn, $($arg:expr),*) => {{ warn!($($arg),*); }};
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! net_log {
        ($level:ident, $($arg:expr),*) => {{ $( let _ = $arg; )* }}
    }
}

macro_rules! net_trace {
    ($($arg:expr),*) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),*) => (net_log!(debug, $($arg),*));
}

/// Invariant violations that the configured policy chose to survive.
macro_rules! net_warn {
    ($($arg:expr),*) => (net_log!(warn, $($arg),*));
}

#[cfg(test)]
mod tests {
    #[test]
    fn log_macros_are_expressions() {
        let levels: [fn(u8); 3] = [
            |n| match n {
                0 => net_trace!("zero"),
                n => net_trace!("{}", n),
            },
            |n| match n {
                0 => net_debug!("zero"),
                _ => (),
            },
            |n| if n > 1 { net_warn!("{} > {}", n, 1) } else { net_warn!("small") },
        ];
        for level in levels.iter() {
            level(0);
            level(2);
        }
    }
}
