//! Lifecycle callbacks invoked while a database is being opened

use rusqlite::Connection;

/// Callbacks the helper invokes, in order, on every fresh connection
///
/// 1. [`on_configure`](MigrationHooks::on_configure) right after opening
/// 2. [`on_create`](MigrationHooks::on_create) or [`on_upgrade`](MigrationHooks::on_upgrade)
///    inside the migration transaction, only when the persisted version differs
/// 3. [`on_open`](MigrationHooks::on_open) once the version is reconciled
///
/// There is no `on_downgrade` hook. Downgrading is a fixed policy rather than a callback:
/// a persisted version above the target always fails with
/// [`HelperError::DowngradeUnsupported`](crate::HelperError::DowngradeUnsupported) before
/// any hook runs, and the persisted version is left as it was.
///
/// Hooks must not call back into the [`OpenHelper`](crate::OpenHelper) that invoked them;
/// doing so fails with [`HelperError::Reentrancy`](crate::HelperError::Reentrancy).
pub trait MigrationHooks: Send + Sync {
    /// Configure connection parameters (PRAGMAs, functions). Must not modify the schema.
    fn on_configure(&self, _conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }

    /// Create the schema of a brand-new database
    fn on_create(&self, conn: &Connection) -> anyhow::Result<()>;

    /// Migrate the schema forward. `old_version < new_version` always holds.
    fn on_upgrade(&self, conn: &Connection, old_version: u32, new_version: u32)
        -> anyhow::Result<()>;

    /// Called after the version is reconciled. Must not begin a transaction.
    fn on_open(&self, _conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Identifies the hook that produced a [`HelperError::Hook`](crate::HelperError::Hook)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Configure,
    Create,
    Upgrade,
    Open,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::Configure => write!(f, "configure"),
            HookKind::Create => write!(f, "create"),
            HookKind::Upgrade => write!(f, "upgrade"),
            HookKind::Open => write!(f, "open"),
        }
    }
}

type ConnHook = Box<dyn Fn(&Connection) -> anyhow::Result<()> + Send + Sync>;
type UpgradeHook = Box<dyn Fn(&Connection, u32, u32) -> anyhow::Result<()> + Send + Sync>;

/// [`MigrationHooks`] assembled from closures
///
/// Unset hooks do nothing.
///
/// ```rust,ignore
/// let hooks = HookSet::new()
///     .create(|conn| Ok(conn.execute_batch(CREATE_BOOKS)?))
///     .upgrade(|conn, _old, _new| Ok(conn.execute_batch("DROP TABLE IF EXISTS books")?));
/// ```
#[derive(Default)]
pub struct HookSet {
    configure: Option<ConnHook>,
    create: Option<ConnHook>,
    upgrade: Option<UpgradeHook>,
    open: Option<ConnHook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.configure = Some(Box::new(f));
        self
    }

    pub fn create<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.create = Some(Box::new(f));
        self
    }

    pub fn upgrade<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, u32, u32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.upgrade = Some(Box::new(f));
        self
    }

    pub fn open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.open = Some(Box::new(f));
        self
    }
}

impl MigrationHooks for HookSet {
    fn on_configure(&self, conn: &Connection) -> anyhow::Result<()> {
        self.configure.as_ref().map_or(Ok(()), |f| f(conn))
    }

    fn on_create(&self, conn: &Connection) -> anyhow::Result<()> {
        self.create.as_ref().map_or(Ok(()), |f| f(conn))
    }

    fn on_upgrade(
        &self,
        conn: &Connection,
        old_version: u32,
        new_version: u32,
    ) -> anyhow::Result<()> {
        self.upgrade
            .as_ref()
            .map_or(Ok(()), |f| f(conn, old_version, new_version))
    }

    fn on_open(&self, conn: &Connection) -> anyhow::Result<()> {
        self.open.as_ref().map_or(Ok(()), |f| f(conn))
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("configure", &self.configure.is_some())
            .field("create", &self.create.is_some())
            .field("upgrade", &self.upgrade.is_some())
            .field("open", &self.open.is_some())
            .finish()
    }
}
