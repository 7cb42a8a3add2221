//! Transaction guard with rollback-on-drop.

use std::cell::{Ref, RefCell};

use sqlguard_core::{Context, DriverTransaction, Error, PreparedStatement, Result, Row, Value};

use crate::database::Database;
use crate::executor::{Executor, OneRow};
use crate::statement::{Statement, StatementOwner};

/// An open transaction.
///
/// Every statement goes through the owning [`Database`]'s hooks, default timeout and
/// error mapper. After [`commit`](Self::commit) or [`rollback`](Self::rollback) every
/// operation fails with [`Error::TransactionClosed`]. Dropping a transaction that is
/// still active rolls it back.
pub struct Transaction<'db> {
    db: &'db Database,
    session: RefCell<Option<Box<dyn DriverTransaction + 'db>>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database, session: Box<dyn DriverTransaction + 'db>) -> Self {
        Self {
            db,
            session: RefCell::new(Some(session)),
        }
    }

    fn session(&self) -> Result<Ref<'_, dyn DriverTransaction + 'db>> {
        Ref::filter_map(self.session.borrow(), |s| s.as_deref())
            .map_err(|_| Error::TransactionClosed)
    }

    fn take(&self) -> Result<Box<dyn DriverTransaction + 'db>> {
        self.session
            .borrow_mut()
            .take()
            .ok_or(Error::TransactionClosed)
    }

    /// Whether neither commit nor rollback has been called yet.
    pub fn is_active(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn commit(&self, ctx: &Context) -> Result<()> {
        let session = self.take()?;
        let pipeline = self.db.pipeline();
        let ctx = pipeline.context(ctx);
        session.commit(&ctx).map_err(|e| pipeline.classify(e))?;
        tracing::info!("Transaction committed");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn rollback(&self, ctx: &Context) -> Result<()> {
        let session = self.take()?;
        let pipeline = self.db.pipeline();
        let ctx = pipeline.context(ctx);
        session.rollback(&ctx).map_err(|e| pipeline.classify(e))?;
        tracing::info!("Transaction rolled back");
        Ok(())
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    /// Create a savepoint. Names must be plain identifiers.
    pub fn savepoint(&self, ctx: &Context, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        self.execute(ctx, &format!("SAVEPOINT {name}"), &[])
            .map(|_| ())
    }

    /// Undo everything since the named savepoint; the transaction stays open.
    pub fn rollback_to(&self, ctx: &Context, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        self.execute(ctx, &format!("ROLLBACK TO SAVEPOINT {name}"), &[])
            .map(|_| ())
    }

    pub fn release(&self, ctx: &Context, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        self.execute(ctx, &format!("RELEASE SAVEPOINT {name}"), &[])
            .map(|_| ())
    }
}

impl Executor for Transaction<'_> {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<u64> {
        let session = self.session()?;
        self.db
            .pipeline()
            .run(ctx, sql, args, |ctx| session.execute(ctx, sql, args))
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let session = self.session()?;
        self.db
            .pipeline()
            .run(ctx, sql, args, |ctx| session.query(ctx, sql, args))
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> OneRow {
        let result = self.session().and_then(|session| {
            self.db
                .pipeline()
                .run(ctx, sql, args, |ctx| session.query_one(ctx, sql, args))
        });
        OneRow::new(result, self.db.mapper_handle())
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> Result<Statement<'_>> {
        let prepared = {
            let session = self.session()?;
            self.db
                .pipeline()
                .run(ctx, sql, &[], |ctx| session.prepare(ctx, sql))?
        };
        Ok(Statement::new(self, prepared))
    }
}

impl StatementOwner for Transaction<'_> {
    fn execute_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> Result<u64> {
        let session = self.session()?;
        self.db.pipeline().run(ctx, stmt.sql(), args, |ctx| {
            session.execute_prepared(ctx, stmt, args)
        })
    }

    fn query_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> Result<Vec<Row>> {
        let session = self.session()?;
        self.db.pipeline().run(ctx, stmt.sql(), args, |ctx| {
            session.query_prepared(ctx, stmt, args)
        })
    }

    fn query_one_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> OneRow {
        let result = self.session().and_then(|session| {
            self.db.pipeline().run(ctx, stmt.sql(), args, |ctx| {
                session.query_one_prepared(ctx, stmt, args)
            })
        });
        OneRow::new(result, self.db.mapper_handle())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };
        if std::thread::panicking() {
            tracing::warn!("Transaction dropped while unwinding; rolling back");
        } else {
            tracing::warn!("Transaction dropped without commit or rollback; rolling back");
        }
        if let Err(err) = session.rollback(&Context::background()) {
            let err = self.db.pipeline().classify(err);
            tracing::error!(error = %err, "Rollback on drop failed");
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Savepoint names are interpolated into SQL, so only plain identifiers pass.
fn validate_savepoint_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(
            "savepoint name cannot be empty".to_string(),
        ));
    }
    if name.len() > 63 {
        return Err(Error::InvalidInput(format!(
            "savepoint name exceeds 63 characters: {}",
            name.len()
        )));
    }
    let mut chars = name.chars();
    if chars
        .next()
        .is_some_and(|first| !first.is_ascii_alphabetic() && first != '_')
    {
        return Err(Error::InvalidInput(format!(
            "savepoint name must start with a letter or underscore: {name:?}"
        )));
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::InvalidInput(format!(
            "savepoint name contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
