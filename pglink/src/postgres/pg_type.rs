/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// A type that have corresponding postgres oid.
pub trait PgType {
    const OID: Oid;
}

/// Builtin type oids, as listed in `pg_type.dat`.
pub mod oid {
    use super::Oid;

    macro_rules! oids {
        ($($name:ident = $oid:literal, $doc:literal;)*) => {
            $(
                #[doc = $doc]
                pub const $name: Oid = $oid;
            )*
        };
    }

    oids! {
        UNSPECIFIED = 0, "type left unspecified, the server infers it";
        BOOL = 16, "`bool` boolean, 'true'/'false'";
        BYTEA = 17, "`bytea` variable-length string, binary values escaped";
        CHAR = 18, "`char` single character";
        NAME = 19, "`name` 63-byte type for storing system identifiers";
        INT8 = 20, "`int8` ~18 digit integer, 8-byte storage";
        INT2 = 21, "`int2` -32 thousand to 32 thousand, 2-byte storage";
        INT4 = 23, "`int4` -2 billion to 2 billion integer, 4-byte storage";
        TEXT = 25, "`text` variable-length string, no limit specified";
        OID = 26, "`oid` object identifier";
        JSON = 114, "`json` JSON stored as text";
        POINT = 600, "`point` geometric point '(x, y)'";
        LSEG = 601, "`lseg` geometric line segment '(pt1,pt2)'";
        PATH = 602, "`path` geometric path '(pt1,...)'";
        BOX = 603, "`box` geometric box '(lower left,upper right)'";
        POLYGON = 604, "`polygon` geometric polygon '(pt1,...)'";
        LINE = 628, "`line` geometric line";
        FLOAT4 = 700, "`float4` single-precision floating point number, 4-byte storage";
        FLOAT8 = 701, "`float8` double-precision floating point number, 8-byte storage";
        UNKNOWN = 705, "`unknown` pseudo-type representing an undetermined type";
        CIRCLE = 718, "`circle` geometric circle '(center,radius)'";
        BPCHAR = 1042, "`bpchar` 'char(length)' blank-padded string, fixed storage length";
        VARCHAR = 1043, "`varchar` 'varchar(length)' non-blank-padded string, variable storage length";
        DATE = 1082, "`date` date";
        TIME = 1083, "`time` time of day";
        TIMESTAMP = 1114, "`timestamp` date and time";
        TIMESTAMPTZ = 1184, "`timestamptz` date and time with time zone";
        INTERVAL = 1186, "`interval` time interval";
        TIMETZ = 1266, "`timetz` time of day with time zone";
        NUMERIC = 1700, "`numeric` 'numeric(precision, scale)' arbitrary precision number";
        UUID = 2950, "`uuid` UUID";
        JSONB = 3802, "`jsonb` Binary JSON";

        BOOL_ARRAY = 1000, "`_bool`";
        BYTEA_ARRAY = 1001, "`_bytea`";
        CHAR_ARRAY = 1002, "`_char`";
        NAME_ARRAY = 1003, "`_name`";
        INT2_ARRAY = 1005, "`_int2`";
        INT4_ARRAY = 1007, "`_int4`";
        TEXT_ARRAY = 1009, "`_text`";
        BPCHAR_ARRAY = 1014, "`_bpchar`";
        VARCHAR_ARRAY = 1015, "`_varchar`";
        INT8_ARRAY = 1016, "`_int8`";
        POINT_ARRAY = 1017, "`_point`";
        LSEG_ARRAY = 1018, "`_lseg`";
        PATH_ARRAY = 1019, "`_path`";
        BOX_ARRAY = 1020, "`_box`";
        FLOAT4_ARRAY = 1021, "`_float4`";
        FLOAT8_ARRAY = 1022, "`_float8`";
        POLYGON_ARRAY = 1027, "`_polygon`";
        JSON_ARRAY = 199, "`_json`";
        LINE_ARRAY = 629, "`_line`";
        CIRCLE_ARRAY = 719, "`_circle`";
        TIMESTAMP_ARRAY = 1115, "`_timestamp`";
        DATE_ARRAY = 1182, "`_date`";
        TIME_ARRAY = 1183, "`_time`";
        TIMESTAMPTZ_ARRAY = 1185, "`_timestamptz`";
        INTERVAL_ARRAY = 1187, "`_interval`";
        NUMERIC_ARRAY = 1231, "`_numeric`";
        TIMETZ_ARRAY = 1270, "`_timetz`";
        UUID_ARRAY = 2951, "`_uuid`";
        JSONB_ARRAY = 3807, "`_jsonb`";
    }
}

macro_rules! pg_type {
    ($($ty:ty => $oid:ident),* $(,)?) => {
        $(
            impl PgType for $ty {
                const OID: Oid = oid::$oid;
            }
        )*
    };
}

pg_type! {
    bool => BOOL,
    i16 => INT2,
    i32 => INT4,
    i64 => INT8,
    f32 => FLOAT4,
    f64 => FLOAT8,
    str => TEXT,
    String => TEXT,
    [u8] => BYTEA,
    bytes::Bytes => BYTEA,
    uuid::Uuid => UUID,
    time::Date => DATE,
    time::Time => TIME,
    time::PrimitiveDateTime => TIMESTAMP,
    time::OffsetDateTime => TIMESTAMPTZ,
    serde_json::Value => JSONB,
}
