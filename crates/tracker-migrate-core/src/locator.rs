use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use url::Url;

use crate::MigrateError;

/// Store family selected by the locator scheme.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StoreFamily {
    Sqlite,
    Postgresql,
    Mysql,
}

impl StoreFamily {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    /// Family for a URL scheme. A `+driver` suffix is ignored and `postgres` is an alias
    /// of `postgresql`.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        let family = scheme.split('+').next().unwrap_or(scheme);
        match family {
            "sqlite" => Some(Self::Sqlite),
            "postgres" | "postgresql" => Some(Self::Postgresql),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }
}

impl Display for StoreFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed target-store locator.
///
/// SQLite locators follow the common URL convention: `sqlite:///relative.db`,
/// `sqlite:////absolute/path.db`, and `sqlite://`, `sqlite:///:memory:` or
/// `sqlite::memory:` for an in-memory database. Server locators keep their parsed URL;
/// whether a family can be opened is up to the store backend.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreLocator {
    SqliteFile(PathBuf),
    SqliteMemory,
    Server { family: StoreFamily, url: Url },
}

impl StoreLocator {
    /// # Errors
    /// Returns [`MigrateError::Connection`] for locators that are not URLs, for unknown
    /// schemes and for malformed SQLite locators.
    pub fn parse(raw: &str) -> Result<Self, MigrateError> {
        let raw = raw.trim();
        let mut url = Url::parse(raw).map_err(|err| {
            MigrateError::connection(format!(
                "store locator `{}` is not a URL: {err}",
                redact_locator(raw)
            ))
        })?;

        match StoreFamily::from_scheme(url.scheme()) {
            Some(StoreFamily::Sqlite) => Self::sqlite(raw, &url),
            Some(family) => {
                if url.scheme() == "postgres" {
                    url.set_scheme("postgresql").map_err(|()| {
                        MigrateError::connection("failed to normalize `postgres` scheme")
                    })?;
                }
                Ok(Self::Server { family, url })
            }
            None => Err(MigrateError::connection(format!(
                "unknown store scheme `{}`",
                url.scheme()
            ))),
        }
    }

    fn sqlite(raw: &str, url: &Url) -> Result<Self, MigrateError> {
        if url.cannot_be_a_base() {
            return if url.path() == ":memory:" {
                Ok(Self::SqliteMemory)
            } else {
                Err(MigrateError::connection("sqlite locator must start with `sqlite://`"))
            };
        }
        if let Some(host) = url.host_str().filter(|host| !host.is_empty()) {
            return Err(MigrateError::connection(format!(
                "sqlite locator names host `{host}`; expected `sqlite:///<path>`"
            )));
        }

        // The parsed path drops `.`/`..` segments and the slash count, both of which
        // matter for a relative file path, so the path comes from the raw text.
        let Some((_, rest)) = raw.split_once("://") else {
            return Err(MigrateError::connection("sqlite locator must start with `sqlite://`"));
        };
        let path = rest.strip_prefix('/').unwrap_or(rest);
        let path = path.split(['?', '#']).next().unwrap_or_default();

        if path.is_empty() || path == ":memory:" {
            Ok(Self::SqliteMemory)
        } else {
            Ok(Self::SqliteFile(PathBuf::from(path)))
        }
    }

    #[must_use]
    pub fn family(&self) -> StoreFamily {
        match self {
            Self::SqliteFile(_) | Self::SqliteMemory => StoreFamily::Sqlite,
            Self::Server { family, .. } => *family,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::SqliteFile(path) => Some(path),
            Self::SqliteMemory | Self::Server { .. } => None,
        }
    }
}

impl Display for StoreLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqliteFile(path) => write!(f, "sqlite file {}", path.display()),
            Self::SqliteMemory => f.write_str("sqlite in-memory"),
            Self::Server { family, url } => {
                write!(f, "{family} server {}", redact_locator(url.as_str()))
            }
        }
    }
}

/// Masks the password of a locator so it can be logged.
///
/// Locators without a password come back unchanged. Text that does not parse as a URL
/// but carries userinfo (`@`) is masked entirely.
#[must_use]
pub fn redact_locator(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) if raw.contains('@') => "***".to_string(),
        Err(_) => raw.to_string(),
    }
}
