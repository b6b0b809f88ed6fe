use thiserror::Error;

/// Errores que las operaciones de reproducción devuelven al llamador.
///
/// Los errores transitorios del stream y los fallos al guardar no llegan aquí:
/// se registran donde ocurren y la reproducción sigue.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlayerError {
    /// Entrada ausente o mal formada. No se modificó nada.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No existe la guild, el canal, la pista o el registro guardado.
    #[error("{0} not found")]
    NotFound(String),

    /// No se pudo usar la plataforma de voz o arrancar el transcodificador.
    #[error("{0}")]
    Unavailable(String),
}

impl PlayerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Etiqueta corta que usa la capa HTTP.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

/// Rechaza identificadores vacíos antes de tocar cualquier estado.
pub fn require_id<'a>(field: &str, value: &'a str) -> PlayerResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PlayerError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// Las posiciones son segundos, finitos y no negativos.
pub fn require_position(field: &str, value: f64) -> PlayerResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(PlayerError::validation(format!(
            "{field} must be a non-negative number of seconds, got {value}"
        )));
    }
    Ok(value)
}
