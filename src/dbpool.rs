//! Bounded database connection pool with semaphore-based admission and a
//! scope-guarded lease, grounded on two sources: the admission policy
//! (counting semaphore + mutex-guarded queue) from
//! `examples/original_source/code/pool/sqlconnpool.cpp`, and the
//! `ManuallyDrop` scoped-lease shape from `elbaro-zero-mysql`'s
//! `src/sync/pool.rs` (`Pool`/`PooledConn`).

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};
use std_semaphore::Semaphore;

use crate::error::Result;
use crate::{log_debug, log_error, log_info};

pub struct DbPool {
    conns: ArrayQueue<Conn>,
    sem: Semaphore,
    max: usize,
}

impl DbPool {
    /// Opens `max` connections up front and seeds both the queue and the
    /// counting semaphore, mirroring `SqlConnPool::Init`.
    pub fn init(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        db_name: &str,
        max: usize,
    ) -> Result<Arc<Self>> {
        assert!(max > 0);

        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(db_name))
            .into();

        let conns = ArrayQueue::new(max);
        for _ in 0..max {
            let conn = Conn::new(opts.clone())?;
            log_info!("Mysql connect success!");
            // queue capacity == max, so this can never fail.
            let _ = conns.push(conn);
        }

        Ok(Arc::new(Self {
            conns,
            sem: Semaphore::new(max as isize),
            max,
        }))
    }

    /// Blocks on the admission semaphore, then takes a handle from the
    /// queue. The semaphore guarantees a handle is present once acquired.
    pub fn get_conn(self: &Arc<Self>) -> PooledConn {
        self.sem.acquire();
        let conn = self
            .conns
            .pop()
            .expect("semaphore admitted more callers than available connections");
        log_debug!("GetConn: free {}/{}", self.available(), self.max);
        PooledConn {
            conn: ManuallyDrop::new(conn),
            pool: Arc::clone(self),
        }
    }

    fn check_in(&self, conn: Conn) {
        // push always succeeds: exactly `max` permits are ever outstanding.
        let _ = self.conns.push(conn);
        self.sem.release();
    }

    pub fn available(&self) -> usize {
        self.conns.len()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// A leased database connection. Released back to the pool unconditionally
/// when dropped, on every control-flow path including early returns and
/// panics unwinding through the lease's scope.
pub struct PooledConn {
    pool: Arc<DbPool>,
    conn: ManuallyDrop<Conn>,
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: `conn` is only read via `ManuallyDrop::take` here, and
        // `self` is never used again afterwards.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn);
    }
}

/// Verifies or creates a user account. Success for login means the row
/// exists and its stored password matches; success for registration means
/// no row exists and the insert succeeds. Queries are parameterised to
/// avoid the injection hazard flagged in spec §9.
pub fn user_verify(pool: &Arc<DbPool>, name: &str, password: &str, is_login: bool) -> bool {
    if name.is_empty() || password.is_empty() {
        return false;
    }

    log_info!("Verify name = {name}");

    let mut conn = pool.get_conn();

    let row: Option<(String, String)> = match conn.exec_first(
        "SELECT username, password FROM user WHERE username = ? LIMIT 1",
        (name,),
    ) {
        Ok(row) => row,
        Err(e) => {
            log_error!("Query Error: {e}");
            return false;
        }
    };

    match row {
        Some((_, stored_password)) => {
            if is_login {
                let ok = stored_password == password;
                if !ok {
                    log_info!("Password is not correct");
                }
                ok
            } else {
                // registering an existing username fails.
                false
            }
        }
        None => {
            if is_login {
                return false;
            }
            match conn.exec_drop(
                "INSERT INTO user(username, password) VALUES (?, ?)",
                (name, password),
            ) {
                Ok(()) => true,
                Err(e) => {
                    log_error!("Insert Error: {e}");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // `user_verify` and `DbPool::init` both require a live mysql server, so
    // they are exercised only by the integration test harness, not here.
}
