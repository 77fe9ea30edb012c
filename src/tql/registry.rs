//! Function tables used to compile each kind of stage.
//!
//! Upper-case names are stage constructors; lower-case names are options
//! and helpers. Every table also carries the common math and time helpers.

use super::funcs::register_common;
use super::map::{self, fft, script};
use super::sink::{self, db, encoder};
use super::source::{fake, query, reader};
use crate::expr::{Function, Functions, function};
use std::sync::LazyLock;

fn table<const N: usize>(entries: [(&str, Function); N]) -> Functions {
    let mut funcs = Functions::new();
    register_common(&mut funcs);
    funcs.extend(entries.map(|(name, f)| (name.to_string(), f)));
    funcs
}

static SOURCES: LazyLock<Functions> = LazyLock::new(|| {
    let mut funcs = table([
        ("SQL", function(query::fn_sql)),
        ("QUERY", function(query::fn_query)),
        ("from", function(query::fn_from)),
        ("between", function(query::fn_between)),
        ("limit", function(query::fn_limit)),
        ("dump", function(query::fn_dump)),
        ("STRING", function(reader::fn_string)),
        ("BYTES", function(reader::fn_bytes)),
        ("file", function(reader::fn_file)),
        ("payload", function(reader::fn_payload)),
        ("delimiter", function(reader::fn_delimiter)),
        ("FAKE", function(fake::fn_fake)),
        ("freq", function(fake::fn_freq)),
        ("oscillator", function(fake::fn_oscillator)),
        ("sphere", function(fake::fn_sphere)),
    ]);
    #[cfg(feature = "io-csv")]
    {
        use super::source::csv;
        funcs.insert("CSV".into(), function(csv::fn_csv));
        funcs.insert("col".into(), function(csv::fn_col));
        funcs.insert("header".into(), function(csv::fn_header));
    }
    funcs
});

static MAPS: LazyLock<Functions> = LazyLock::new(|| {
    table([
        ("TAKE", function(map::fn_take)),
        ("DROP", function(map::fn_drop)),
        ("PUSHKEY", function(map::fn_pushkey)),
        ("POPKEY", function(map::fn_popkey)),
        ("GROUPBYKEY", function(map::fn_groupbykey)),
        ("lazy", function(map::fn_lazy)),
        ("FLATTEN", function(map::fn_flatten)),
        ("FILTER", function(map::fn_filter)),
        ("FFT", function(fft::fn_fft)),
        ("minHz", function(fft::fn_min_hz)),
        ("maxHz", function(fft::fn_max_hz)),
        ("SCRIPT", function(script::fn_script)),
    ])
});

static SINKS: LazyLock<Functions> = LazyLock::new(|| {
    let mut funcs = table([
        ("JSON", function(encoder::fn_json)),
        ("MARKDOWN", function(encoder::fn_markdown)),
        ("CHART_LINE", function(encoder::fn_chart_line)),
        ("CHART_SCATTER", function(encoder::fn_chart_scatter)),
        ("CHART_BAR", function(encoder::fn_chart_bar)),
        ("INSERT", function(db::fn_insert)),
        ("APPEND", function(db::fn_append)),
        ("tz", function(sink::fn_tz)),
        ("sep", function(sink::fn_sep)),
        ("heading", function(sink::fn_heading)),
        ("rownum", function(sink::fn_rownum)),
        ("timeformat", function(sink::fn_timeformat)),
        ("precision", function(sink::fn_precision)),
        ("title", function(sink::fn_title)),
        ("subtitle", function(sink::fn_subtitle)),
        ("series", function(sink::fn_series)),
        ("brief", function(sink::fn_brief)),
        ("table", function(sink::fn_table)),
        ("tag", function(sink::fn_tag)),
    ]);
    #[cfg(feature = "io-csv")]
    funcs.insert("CSV".into(), function(encoder::fn_csv));
    funcs
});

pub(crate) fn source_functions() -> &'static Functions {
    &SOURCES
}

pub(crate) fn map_functions() -> &'static Functions {
    &MAPS
}

pub(crate) fn sink_functions() -> &'static Functions {
    &SINKS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_disjoint_by_kind() {
        for name in ["FAKE", "QUERY", "STRING"] {
            assert!(source_functions().contains_key(name));
            assert!(!map_functions().contains_key(name));
        }
        for name in ["TAKE", "SCRIPT", "FFT"] {
            assert!(map_functions().contains_key(name));
            assert!(!sink_functions().contains_key(name));
        }
        assert!(sink_functions().contains_key("INSERT"));
        assert!(map_functions().contains_key("linspace"));
    }
}
