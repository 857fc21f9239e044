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

//! Diesel table definitions shared by both backends.
//!
//! Column types are restricted to ones both PostgreSQL and SQLite map the
//! same way (`BigInt`, `Integer`, `Text`, `Bool`, `Timestamp`), so a single
//! set of row structs serves either backend.

diesel::table! {
    workerqueue (id) {
        id -> BigInt,
        command -> Text,
        parameters -> Text,
        priority -> Integer,
        created_at -> Timestamp,
        claimed_by -> BigInt,
        executed_at -> Nullable<Timestamp>,
        next_attempt_at -> Timestamp,
        attempt_count -> Integer,
        done -> Bool,
        outcome -> Nullable<Text>,
        dedup_key -> Text,
    }
}

diesel::table! {
    worker_ipc (key) {
        key -> Integer,
        jobs -> Bool,
    }
}

diesel::table! {
    remote_servers (id) {
        id -> BigInt,
        url -> Text,
        normalized_url -> Text,
        protocol -> Text,
        register_policy -> Integer,
        failed -> Bool,
        archived -> Bool,
        last_contact -> Nullable<Timestamp>,
        last_failure -> Nullable<Timestamp>,
        next_contact -> Nullable<Timestamp>,
        relay_subscribe -> Bool,
        relay_scope -> Text,
        relay_tags -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    remote_contacts (id) {
        id -> BigInt,
        server_id -> BigInt,
        owner_id -> BigInt,
        protocol -> Text,
        inbox -> Text,
        shared_inbox -> Nullable<Text>,
        is_follower -> Bool,
        is_relay -> Bool,
        last_delivered -> Nullable<Timestamp>,
        last_failed_delivery -> Nullable<Timestamp>,
        archived -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    inbox_status (url) {
        url -> Text,
        created_at -> Timestamp,
        last_success -> Nullable<Timestamp>,
        last_failure -> Nullable<Timestamp>,
        previous_attempt -> Nullable<Timestamp>,
        failing_since -> Nullable<Timestamp>,
        archived -> Bool,
        is_shared -> Bool,
    }
}

diesel::table! {
    delivery_counters (content_id, protocol) {
        content_id -> Text,
        protocol -> Text,
        queued -> BigInt,
        delivered -> BigInt,
        failed -> BigInt,
    }
}

diesel::joinable!(remote_contacts -> remote_servers (server_id));

diesel::allow_tables_to_appear_in_same_query!(
    workerqueue,
    worker_ipc,
    remote_servers,
    remote_contacts,
    inbox_status,
    delivery_counters,
);
