//! Postgres schema: table identifiers for sea-query and the bootstrap script.
//!
//! Every object is created unqualified; connections run with `search_path`
//! set to the configured schema, so the same script serves any schema.

use sea_query::Iden;

/// Stream table schema.
#[derive(Iden)]
pub enum Stream {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "id_internal"]
    IdInternal,
    #[iden = "version"]
    Version,
    #[iden = "position"]
    Position,
    #[iden = "max_age"]
    MaxAge,
    #[iden = "max_count"]
    MaxCount,
    #[iden = "truncate_before"]
    TruncateBefore,
}

/// Message table schema.
#[derive(Iden)]
pub enum Message {
    Table,
    #[iden = "stream_id_internal"]
    StreamIdInternal,
    #[iden = "message_id"]
    MessageId,
    #[iden = "stream_version"]
    StreamVersion,
    #[iden = "position"]
    Position,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "type"]
    Type,
    #[iden = "data"]
    Data,
    #[iden = "meta"]
    Meta,
}

/// SQLSTATE raised by the functions on a version conflict.
pub const WRONG_EXPECTED_VERSION_STATE: &str = "SS001";
/// SQLSTATE raised when a message id is reused; the message carries the id.
pub const DUPLICATE_MESSAGE_STATE: &str = "SS002";
/// SQLSTATE of a unique constraint violation.
pub const UNIQUE_VIOLATION_STATE: &str = "23505";

/// Tables, sequence and functions. Safe to run repeatedly.
pub const SETUP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stream (
    id_internal bigserial PRIMARY KEY,
    id text NOT NULL UNIQUE,
    version bigint NOT NULL DEFAULT -1,
    position bigint NOT NULL DEFAULT -1,
    max_age bigint DEFAULT NULL,
    max_count bigint DEFAULT NULL,
    truncate_before bigint DEFAULT NULL
);

CREATE SEQUENCE IF NOT EXISTS message_position_seq START 0 MINVALUE 0;

CREATE TABLE IF NOT EXISTS message (
    stream_id_internal bigint NOT NULL REFERENCES stream(id_internal) ON DELETE CASCADE,
    message_id uuid NOT NULL,
    stream_version bigint NOT NULL,
    position bigint NOT NULL PRIMARY KEY DEFAULT nextval('message_position_seq'),
    created_at timestamptz NOT NULL,
    "type" text NOT NULL,
    data json NOT NULL,
    meta json NOT NULL,
    CONSTRAINT message_stream_version_unique UNIQUE (stream_id_internal, stream_version),
    CONSTRAINT message_stream_message_id_unique UNIQUE (stream_id_internal, message_id)
);

ALTER SEQUENCE message_position_seq OWNED BY message.position;

CREATE OR REPLACE FUNCTION append_to_stream(
    _stream_id text,
    _expected_version bigint,
    _created_at timestamptz,
    _message_ids uuid[],
    _types text[],
    _data text[],
    _meta text[]
) RETURNS TABLE (
    current_version bigint,
    current_position bigint,
    current_max_age bigint,
    current_max_count bigint,
    current_truncate_before bigint
) AS $fn$
#variable_conflict use_column
DECLARE
    _stream stream%ROWTYPE;
    _count int := coalesce(array_length(_message_ids, 1), 0);
    _stored uuid[];
    _tail uuid[];
    _start int;
    _known uuid;
    _version bigint;
    _position bigint;
BEGIN
    IF _created_at IS NULL THEN
        _created_at := now();
    END IF;

    SELECT * INTO _stream FROM stream WHERE id = _stream_id FOR UPDATE;
    IF NOT FOUND THEN
        IF _expected_version >= 0 THEN
            RAISE EXCEPTION 'WrongExpectedVersion' USING ERRCODE = 'SS001';
        END IF;

        INSERT INTO stream (id, version, position, max_age, max_count, truncate_before)
        SELECT _stream_id, -1, -1, meta.max_age, meta.max_count, meta.truncate_before
        FROM (SELECT 1) AS one
        LEFT JOIN stream AS meta ON meta.id = '$$' || _stream_id
        ON CONFLICT (id) DO NOTHING;

        SELECT * INTO _stream FROM stream WHERE id = _stream_id FOR UPDATE;
    END IF;

    SELECT coalesce(array_agg(m.message_id ORDER BY m.stream_version), '{}')
    INTO _stored
    FROM message AS m
    WHERE m.stream_id_internal = _stream.id_internal;

    IF _expected_version = -2 THEN
        IF _count > 0 THEN
            _start := array_position(_stored, _message_ids[1]);
            IF _start IS NOT NULL THEN
                IF _count <= coalesce(array_length(_stored, 1), 0) - _start + 1
                    AND _stored[_start:_start + _count - 1] = _message_ids THEN
                    RETURN QUERY SELECT _stream.version, _stream.position, _stream.max_age,
                        _stream.max_count, _stream.truncate_before;
                    RETURN;
                END IF;
                RAISE EXCEPTION 'WrongExpectedVersion' USING ERRCODE = 'SS001';
            END IF;
        END IF;
    ELSIF _expected_version > _stream.version THEN
        RAISE EXCEPTION 'WrongExpectedVersion' USING ERRCODE = 'SS001';
    ELSIF _expected_version < _stream.version THEN
        SELECT coalesce(array_agg(m.message_id ORDER BY m.stream_version), '{}')
        INTO _tail
        FROM message AS m
        WHERE m.stream_id_internal = _stream.id_internal
          AND m.stream_version > _expected_version;

        IF _count <= coalesce(array_length(_tail, 1), 0)
            AND (_count = 0 OR _tail[1:_count] = _message_ids) THEN
            RETURN QUERY SELECT _stream.version, _stream.position, _stream.max_age,
                _stream.max_count, _stream.truncate_before;
            RETURN;
        END IF;
        RAISE EXCEPTION 'WrongExpectedVersion' USING ERRCODE = 'SS001';
    END IF;

    SELECT incoming INTO _known
    FROM unnest(_message_ids) AS incoming
    WHERE incoming = ANY (_stored)
    LIMIT 1;
    IF _known IS NOT NULL THEN
        RAISE EXCEPTION '%', _known USING ERRCODE = 'SS002';
    END IF;

    _version := _stream.version;
    _position := _stream.position;
    FOR _i IN 1 .. _count LOOP
        _version := _version + 1;
        INSERT INTO message (stream_id_internal, message_id, stream_version, created_at, "type", data, meta)
        VALUES (_stream.id_internal, _message_ids[_i], _version, _created_at, _types[_i],
            _data[_i]::json, _meta[_i]::json)
        RETURNING message.position INTO _position;
    END LOOP;

    IF _count > 0 THEN
        UPDATE stream SET version = _version, position = _position
        WHERE id_internal = _stream.id_internal;
        PERFORM pg_notify('new_messages', _stream_id);
    END IF;

    RETURN QUERY SELECT _version, _position, _stream.max_age, _stream.max_count,
        _stream.truncate_before;
END;
$fn$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION set_stream_metadata(
    _stream_id text,
    _expected_version bigint,
    _created_at timestamptz,
    _message_id uuid,
    _type text,
    _data text,
    _meta text,
    _max_age bigint,
    _max_count bigint,
    _truncate_before bigint
) RETURNS TABLE (current_version bigint, current_position bigint) AS $fn$
#variable_conflict use_column
DECLARE
    _version bigint;
    _position bigint;
BEGIN
    SELECT a.current_version, a.current_position
    INTO _version, _position
    FROM append_to_stream('$$' || _stream_id, _expected_version, _created_at,
        ARRAY[_message_id], ARRAY[_type], ARRAY[_data], ARRAY[_meta]) AS a;

    UPDATE stream
    SET max_age = _max_age, max_count = _max_count, truncate_before = _truncate_before
    WHERE id IN (_stream_id, '$$' || _stream_id);

    RETURN QUERY SELECT _version, _position;
END;
$fn$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION delete_stream(
    _stream_id text,
    _expected_version bigint,
    _created_at timestamptz,
    _tombstone_id uuid,
    _tombstone_type text,
    _tombstone_data text
) RETURNS boolean AS $fn$
#variable_conflict use_column
DECLARE
    _stream stream%ROWTYPE;
BEGIN
    SELECT * INTO _stream FROM stream WHERE id = _stream_id FOR UPDATE;
    IF NOT FOUND THEN
        RETURN false;
    END IF;

    IF _expected_version = -1
        OR (_expected_version >= 0 AND _expected_version <> _stream.version) THEN
        RAISE EXCEPTION 'WrongExpectedVersion' USING ERRCODE = 'SS001';
    END IF;

    DELETE FROM message WHERE stream_id_internal = _stream.id_internal;
    DELETE FROM stream WHERE id_internal = _stream.id_internal;

    PERFORM append_to_stream('$deleted', -2, _created_at,
        ARRAY[_tombstone_id], ARRAY[_tombstone_type], ARRAY[_tombstone_data], ARRAY['{}']);
    RETURN true;
END;
$fn$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION scavengable_message_ids(
    _stream_id text,
    _max_age bigint,
    _max_count bigint,
    _truncate_before bigint,
    _now timestamptz
) RETURNS TABLE (message_id uuid) AS $fn$
#variable_conflict use_column
DECLARE
    _internal bigint;
BEGIN
    IF _now IS NULL THEN
        _now := now();
    END IF;

    SELECT id_internal INTO _internal FROM stream WHERE id = _stream_id;
    IF NOT FOUND THEN
        RETURN;
    END IF;

    RETURN QUERY
    SELECT m.message_id
    FROM message AS m
    WHERE m.stream_id_internal = _internal
      AND (
        (coalesce(_max_count, 0) > 0 AND m.stream_version NOT IN (
            SELECT kept.stream_version
            FROM message AS kept
            WHERE kept.stream_id_internal = _internal
            ORDER BY kept.stream_version DESC
            LIMIT _max_count
        ))
        OR (coalesce(_max_age, 0) > 0 AND m.created_at < _now - _max_age * interval '1 second')
        OR (_truncate_before IS NOT NULL AND m.stream_version < _truncate_before)
      )
    ORDER BY m.stream_version;
END;
$fn$ LANGUAGE plpgsql;
"#;

/// Removes everything `SETUP_SQL` creates.
pub const TEARDOWN_SQL: &str = r#"
DROP FUNCTION IF EXISTS scavengable_message_ids(text, bigint, bigint, bigint, timestamptz);
DROP FUNCTION IF EXISTS delete_stream(text, bigint, timestamptz, uuid, text, text);
DROP FUNCTION IF EXISTS set_stream_metadata(text, bigint, timestamptz, uuid, text, text, text, bigint, bigint, bigint);
DROP FUNCTION IF EXISTS append_to_stream(text, bigint, timestamptz, uuid[], text[], text[], text[]);
DROP TABLE IF EXISTS message;
DROP TABLE IF EXISTS stream;
DROP SEQUENCE IF EXISTS message_position_seq;
"#;

/// Quote a schema name for interpolation into DDL.
///
/// Only ASCII letters, digits and underscores are accepted.
pub fn quote_schema(schema: &str) -> Option<String> {
    let valid = !schema.is_empty()
        && schema.len() <= 63
        && schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !schema.starts_with(|c: char| c.is_ascii_digit());
    valid.then(|| format!("\"{}\"", schema))
}
