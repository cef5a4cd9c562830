// crates/storage-lock-core/src/model/dsn.rs
// ============================================================================
// Module: Connection Sources
// Description: Connection strings and the discrete fields they are built from.
// Purpose: Compose and recognize the field-form DSN shared by all connectors.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A connection manager is built either from a ready connection string, which
//! is handed to the connector verbatim, or from discrete fields. Fields are
//! composed into the canonical form `user:password@tcp(host:port)/database`;
//! connectors recognize that form with [`ConnectionFields::parse_dsn`] and map
//! it onto their driver's own configuration.
//!
//! Security posture: passwords never appear in `Debug` output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator between credentials and the network address.
const ADDRESS_PREFIX: &str = "@tcp(";
/// Separator between the network address and the database name.
const DATABASE_PREFIX: &str = ")/";
/// Placeholder used wherever a secret would be rendered.
const REDACTED: &str = "***";

// ============================================================================
// SECTION: Connection Fields
// ============================================================================

/// Discrete connection properties.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFields {
    /// Database server host name or address.
    pub host: String,
    /// Database server port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database (or, for embedded engines, file path) to open.
    pub database: String,
}

impl ConnectionFields {
    /// Creates connection fields.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    /// Sets the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Sets the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Composes `user:password@tcp(host:port)/database`.
    #[must_use]
    pub fn to_dsn(&self) -> String {
        format!(
            "{}:{}{ADDRESS_PREFIX}{}:{}{DATABASE_PREFIX}{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Composes the DSN with the password masked, for diagnostics.
    #[must_use]
    pub fn redacted_dsn(&self) -> String {
        format!(
            "{}:{REDACTED}{ADDRESS_PREFIX}{}:{}{DATABASE_PREFIX}{}",
            self.user, self.host, self.port, self.database
        )
    }

    /// Recognizes a DSN in the field form produced by [`Self::to_dsn`].
    ///
    /// Returns `None` for any other connection string. The password may
    /// contain `:`; the user may not.
    #[must_use]
    pub fn parse_dsn(dsn: &str) -> Option<Self> {
        let at = dsn.rfind(ADDRESS_PREFIX)?;
        let credentials = &dsn[.. at];
        let rest = &dsn[at + ADDRESS_PREFIX.len() ..];
        let close = rest.find(DATABASE_PREFIX)?;
        let address = &rest[.. close];
        let database = &rest[close + DATABASE_PREFIX.len() ..];
        let (user, password) = credentials.split_once(':')?;
        let (host, port) = address.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some(Self::new(host, port, user, password, database))
    }
}

impl fmt::Debug for ConnectionFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFields")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("database", &self.database)
            .finish()
    }
}

// ============================================================================
// SECTION: Connection Source
// ============================================================================

/// Where a connection manager obtains its connection string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionSource {
    /// Pre-built connection string, used verbatim.
    Dsn {
        /// Driver connection string.
        dsn: String,
    },
    /// Discrete fields composed into the field-form DSN.
    Fields(ConnectionFields),
}

impl ConnectionSource {
    /// Returns the connection string handed to the connector.
    #[must_use]
    pub fn to_dsn(&self) -> String {
        match self {
            Self::Dsn {
                dsn,
            } => dsn.clone(),
            Self::Fields(fields) => fields.to_dsn(),
        }
    }

    /// Returns a connection description safe to log.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Dsn {
                ..
            } => "dsn".to_string(),
            Self::Fields(fields) => fields.redacted_dsn(),
        }
    }

    /// Returns true when no usable connection string can be produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Dsn {
                dsn,
            } => dsn.trim().is_empty(),
            Self::Fields(fields) => fields.host.is_empty() && fields.database.is_empty(),
        }
    }
}

impl fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dsn {
                ..
            } => f.debug_struct("Dsn").field("dsn", &REDACTED).finish(),
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionFields;
    use super::ConnectionSource;

    #[test]
    fn password_with_colon_survives_parse() {
        let fields = ConnectionFields::new("db", 3306, "root", "a:b", "locks");
        assert_eq!(ConnectionFields::parse_dsn(&fields.to_dsn()), Some(fields));
    }

    #[test]
    fn non_field_strings_are_not_recognized() {
        assert_eq!(ConnectionFields::parse_dsn("postgres://u:p@localhost/db"), None);
        assert_eq!(ConnectionFields::parse_dsn("/var/lib/locks.db"), None);
        assert_eq!(ConnectionFields::parse_dsn("u:p@tcp(host:notaport)/db"), None);
    }

    #[test]
    fn empty_dsn_source_is_empty() {
        let source = ConnectionSource::Dsn {
            dsn: "   ".to_string(),
        };
        assert!(source.is_empty());
    }
}
