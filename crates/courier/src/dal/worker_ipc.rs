/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The single-row "jobs are waiting" flag used to wake idle workers.

use diesel::prelude::*;

use super::DAL;
use crate::database::schema::worker_ipc;
use crate::error::StoreError;

const IPC_KEY: i32 = 1;

#[derive(Clone)]
pub struct WorkerIpcDAL<'a> {
    dal: &'a DAL,
}

impl<'a> WorkerIpcDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    pub async fn set_jobs(&self, jobs: bool) -> Result<(), StoreError> {
        crate::with_transaction!(self.dal, |conn| {
            diesel::insert_into(worker_ipc::table)
                .values((worker_ipc::key.eq(IPC_KEY), worker_ipc::jobs.eq(jobs)))
                .on_conflict(worker_ipc::key)
                .do_update()
                .set(worker_ipc::jobs.eq(jobs))
                .execute(conn)?;
            Ok(())
        })
    }

    pub async fn jobs_exist(&self) -> Result<bool, StoreError> {
        let jobs: Option<bool> = crate::with_transaction!(self.dal, |conn| {
            Ok(worker_ipc::table
                .find(IPC_KEY)
                .select(worker_ipc::jobs)
                .first(conn)
                .optional()?)
        })?;
        Ok(jobs.unwrap_or(false))
    }

    /// Clears the flag, returning whether it was set. Only one of several
    /// concurrent callers sees `true`.
    pub async fn take_jobs(&self) -> Result<bool, StoreError> {
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(
                worker_ipc::table
                    .filter(worker_ipc::key.eq(IPC_KEY))
                    .filter(worker_ipc::jobs.eq(true)),
            )
            .set(worker_ipc::jobs.eq(false))
            .execute(conn)?)
        })?;
        Ok(updated == 1)
    }

    pub async fn delete(&self) -> Result<(), StoreError> {
        crate::with_transaction!(self.dal, |conn| {
            diesel::delete(worker_ipc::table.find(IPC_KEY)).execute(conn)?;
            Ok(())
        })
    }
}
