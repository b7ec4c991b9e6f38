//! Built-in dialects.

use super::{Dialect, ErrorCode, ErrorTable, SliceSupport};

use ErrorCode::{State, StateClass, Vendor};

/// Fallback for unrecognized products: standard SQLSTATE rules and no slice syntax.
pub fn generic() -> Dialect {
    Dialect {
        name: "generic",
        slice: SliceSupport::NotSupported,
        unbounded_limit: None,
        sequence_query: None,
        truncate: None,
        errors: ErrorTable::default(),
    }
}

pub fn sqlite() -> Dialect {
    Dialect {
        name: "sqlite",
        slice: SliceSupport::LimitAndOffset,
        unbounded_limit: Some("-1"),
        sequence_query: None,
        truncate: None,
        errors: ErrorTable {
            // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
            unique: &[Vendor(2067), Vendor(1555)],
            // FOREIGNKEY, CHECK, NOTNULL, plain CONSTRAINT
            constraint: &[Vendor(787), Vendor(275), Vendor(1299), Vendor(19)],
            privileges: &[Vendor(3), Vendor(23)],
            deadlock: &[Vendor(6), Vendor(262)],
            timeout: &[Vendor(5), Vendor(261), Vendor(517)],
        },
    }
}

pub fn mysql() -> Dialect {
    Dialect {
        name: "mysql",
        slice: SliceSupport::OffsetAndLimit,
        unbounded_limit: Some("18446744073709551615"),
        sequence_query: None,
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[Vendor(1062), Vendor(1586)],
            constraint: &[Vendor(1451), Vendor(1452), Vendor(1048), StateClass("23")],
            privileges: &[Vendor(1142), Vendor(1044), Vendor(1045)],
            deadlock: &[Vendor(1213)],
            timeout: &[Vendor(1205), Vendor(3024)],
        },
    }
}

pub fn postgresql() -> Dialect {
    Dialect {
        name: "postgresql",
        slice: SliceSupport::LimitAndOffset,
        unbounded_limit: None,
        sequence_query: Some("SELECT NEXTVAL('%s')"),
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[State("23505")],
            constraint: &[StateClass("23")],
            privileges: &[State("42501")],
            deadlock: &[State("40P01")],
            timeout: &[State("57014"), State("55P03")],
        },
    }
}

pub fn oracle() -> Dialect {
    Dialect {
        name: "oracle",
        slice: SliceSupport::FromAndTo,
        unbounded_limit: None,
        sequence_query: Some("SELECT %s.NEXTVAL FROM DUAL"),
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[Vendor(1)],
            constraint: &[Vendor(2290), Vendor(2291), Vendor(2292), Vendor(1400)],
            privileges: &[Vendor(1031)],
            deadlock: &[Vendor(60)],
            timeout: &[Vendor(30006), Vendor(51), Vendor(1013)],
        },
    }
}

pub fn sqlserver() -> Dialect {
    Dialect {
        name: "microsoft_sql_server",
        slice: SliceSupport::NotSupported,
        unbounded_limit: None,
        sequence_query: Some("SELECT NEXT VALUE FOR %s"),
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[Vendor(2627), Vendor(2601)],
            constraint: &[Vendor(547), Vendor(515)],
            privileges: &[Vendor(229), Vendor(230)],
            deadlock: &[Vendor(1205)],
            timeout: &[Vendor(1222)],
        },
    }
}

pub fn h2() -> Dialect {
    Dialect {
        name: "h2",
        slice: SliceSupport::LimitAndOffset,
        unbounded_limit: None,
        sequence_query: Some("SELECT NEXT VALUE FOR %s"),
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[State("23505")],
            constraint: &[StateClass("23")],
            privileges: &[State("42501")],
            deadlock: &[State("40001")],
            timeout: &[State("HYT00")],
        },
    }
}

pub fn derby() -> Dialect {
    Dialect {
        name: "apache_derby",
        slice: SliceSupport::NotSupported,
        unbounded_limit: None,
        sequence_query: Some("VALUES NEXT VALUE FOR %s"),
        truncate: Some("TRUNCATE TABLE %s"),
        errors: ErrorTable {
            unique: &[State("23505")],
            constraint: &[StateClass("23")],
            privileges: &[State("42502")],
            deadlock: &[State("40001")],
            timeout: &[State("40XL1"), State("40XL2")],
        },
    }
}

pub fn db2() -> Dialect {
    Dialect {
        name: "db2",
        slice: SliceSupport::NotSupported,
        unbounded_limit: None,
        sequence_query: Some("SELECT NEXT VALUE FOR %s FROM SYSIBM.SYSDUMMY1"),
        truncate: None,
        errors: ErrorTable {
            unique: &[Vendor(-803)],
            constraint: &[Vendor(-530), Vendor(-532), Vendor(-407)],
            privileges: &[Vendor(-551)],
            deadlock: &[Vendor(-911)],
            timeout: &[Vendor(-913)],
        },
    }
}
