use crate::StackError;

/// Выход из функции с ошибкой.
///
/// `bail!(err)` принимает любой тип, приводимый к [`StackError`];
/// `bail!(code, "fmt", args..)` строит [`crate::Failure`] с кодом.
///
/// ```ignore
/// if req.limit < 0 {
///     bail!(StatusCode::InvalidRequest, "negative limit {}", req.limit);
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $($fmt:tt)+) => {
        return Err($crate::StackError::new($crate::Failure::new(
            $code,
            format!($($fmt)+),
        )))
    };
}

/// `bail!`, если условие ложно. Формы те же.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($rest:tt)+) => {
        if !($cond) {
            $crate::bail!($($rest)+);
        }
    };
}

/// `.context(..)` для любого `Result`, ошибка которого приводится к
/// [`StackError`].
pub trait ResultExt<T> {
    fn context<C: Into<String>>(
        self,
        ctx: C,
    ) -> Result<T, StackError>;

    /// Строка контекста строится только при ошибке.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Into<StackError>> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn context<C: Into<String>>(
        self,
        ctx: C,
    ) -> Result<T, StackError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(ctx)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(f())),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
