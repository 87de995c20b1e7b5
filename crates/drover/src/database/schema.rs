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

diesel::table! {
    jobs (id) {
        id -> BigInt,
        group_id -> BigInt,
        queue_type -> Text,
        job_type_id -> Integer,
        definition -> Text,
        result -> Nullable<Text>,
        status -> Text,
        version -> BigInt,
        heartbeat_at -> Timestamp,
        lease_id -> Nullable<Text>,
        lease_owner -> Nullable<Text>,
        cancel_requested -> Bool,
        idempotency_key -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}
