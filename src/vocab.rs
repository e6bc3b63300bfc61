//! Closed vocabularies used by the fingerprint encoder.
//!
//! Indices are positions in these tables and are baked into every stored bank
//! key. Appending is safe; reordering or removing entries requires bumping
//! [crate::platform::BANK_SCHEMA_VERSION].

/// Tag recorded for graph inputs, which carry no op tag of their own.
pub const PLACEHOLDER_TAG: &str = "placeholder";

pub const OP_TAGS: &[&str] = &[
    PLACEHOLDER_TAG,
    "elewise_single_cast",
    "elewise_single_round",
    "elewise_single_ceil",
    "elewise_single_floor",
    "elewise_single_trunc",
    "elewise_single_abs",
    "elewise_single_log",
    "elewise_single_exp",
    "elewise_single_rec",
    "elewise_single_sqrt",
    "elewise_single_rsqrt",
    "elewise_single_relu",
    "elewise_single_not",
    "elewise_single_VS_add",
    "elewise_single_VS_mul",
    "elewise_single_VS_max",
    "elewise_single_VS_min",
    "elewise_binary_add",
    "elewise_binary_sub",
    "elewise_binary_mul",
    "elewise_binary_div",
    "elewise_binary_max",
    "elewise_binary_min",
    "elewise_binary_and",
    "elewise_binary_or",
    "elewise_binary_cmpsel",
    "elewise_binary_vcmpv_gt",
    "elewise_binary_vcmpv_ge",
    "elewise_binary_vcmpv_lt",
    "elewise_binary_vcmpv_le",
    "elewise_binary_vcmpv_eq",
    "elewise_binary_vcmpv_ne",
    "elewise_multiple_mla",
    "elewise_multiple_madd",
    "elewise_multiple_maddrelu",
    "elewise_multiple_sel",
    "broadcast",
    "broadcast_for_tensor",
    "unified_broadcast",
    "reduce_sum",
    "reduce_min",
    "reduce_max",
    "reduce_prod",
    "tuple_reduce_sum",
    "set_value",
    "dma_copy",
    "transpose",
    "concat",
    "split",
    "mem_copy",
];

pub const SPECIAL_ATTRS: &[&str] = &[
    "axis",
    "keepdims",
    "broadcast_axis",
    "perm",
    "split_dim",
    "split_num",
    "concat_dim",
    "is_reduce_last_axis",
];

/// Returns the canonical tag for a compute op: the text before the first `|`.
pub fn canonical_tag(tag: &str) -> &str {
    tag.split('|').next().unwrap_or(tag)
}

pub fn tag_index(tag: &str) -> Option<usize> {
    let canonical = canonical_tag(tag);
    OP_TAGS.iter().position(|t| *t == canonical)
}

pub fn special_attr_index(key: &str) -> Option<usize> {
    SPECIAL_ATTRS.iter().position(|k| *k == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_vocabularies_have_no_duplicates() {
        assert!(OP_TAGS.iter().all_unique());
        assert!(SPECIAL_ATTRS.iter().all_unique());
    }

    #[test]
    fn test_tag_index_uses_first_segment() {
        assert_eq!(tag_index("reduce_sum"), tag_index("reduce_sum|last"));
        assert_eq!(canonical_tag("elewise_binary_add|broadcast"), "elewise_binary_add");
        assert_eq!(tag_index("conv2d"), None);
        assert_eq!(tag_index("|reduce_sum"), None);
    }
}
