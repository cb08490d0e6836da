//! Versioned keyword table used as a cheap pre-filter before the Stage-1 classifier
//! spends a model call on a chunk that is obviously not product content.

/// Bump this whenever the keyword table changes; persisted alongside classifications
/// that relied on it so a re-run can tell which chunks were filtered under an old version.
pub const KEYWORD_TABLE_VERSION: u32 = 1;

/// One category of non-product boilerplate, with its matching keywords.
pub struct KeywordCategory {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

pub const NON_PRODUCT_CATEGORIES: &[KeywordCategory] = &[
    KeywordCategory {
        name: "legal",
        keywords: &["copyright", "all rights reserved", "trademark", "disclaimer", "liability", "warranty void", "terms and conditions", "patent pending"],
    },
    KeywordCategory {
        name: "contact",
        keywords: &["phone:", "email:", "fax:", "customer service", "toll-free", "headquarters", "visit us at", "contact us"],
    },
    KeywordCategory {
        name: "table_of_contents",
        keywords: &["table of contents", "index", "see page", "chapter", "appendix", "glossary", "list of figures"],
    },
    KeywordCategory {
        name: "shipping",
        keywords: &["shipping cost", "freight", "lead time", "delivery window", "minimum order quantity", "incoterms", "pallet quantity"],
    },
    KeywordCategory {
        name: "certifications",
        keywords: &["iso 9001", "greenguard", "fsc certified", "leed", "ce marking", "ul listed", "ansi/bifma", "rohs compliant"],
    },
    KeywordCategory {
        name: "care_instructions",
        keywords: &["cleaning instructions", "maintenance guide", "do not bleach", "spot clean", "machine washable", "care label", "dry clean only"],
    },
    KeywordCategory {
        name: "company_history",
        keywords: &["founded in", "our story", "since 19", "family owned", "headquartered in", "generations of", "legacy of craftsmanship"],
    },
    KeywordCategory {
        name: "page_furniture",
        keywords: &["page", "continued on", "printed in", "revision date", "catalog no.", "doc id"],
    },
    KeywordCategory {
        name: "sustainability",
        keywords: &["carbon neutral", "recycled content", "sustainably sourced", "environmental impact", "net zero", "circular economy"],
    },
    KeywordCategory {
        name: "marketing_fluff",
        keywords: &["award-winning", "industry-leading", "trusted by", "best-in-class", "unparalleled quality", "world-class", "state-of-the-art"],
    },
];

/// Lowercases `text` and returns the category name of the first non-product keyword found, if any.
pub fn matches_non_product_keyword(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    NON_PRODUCT_CATEGORIES
        .iter()
        .find(|category| category.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|category| category.name)
}

/// Total keyword count across all categories, used to sanity-check the table in tests.
pub fn total_keyword_count() -> usize {
    NON_PRODUCT_CATEGORIES.iter().map(|c| c.keywords.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_seventy_one_keywords_across_ten_categories() {
        assert_eq!(NON_PRODUCT_CATEGORIES.len(), 10);
        assert_eq!(total_keyword_count(), 71);
    }

    #[test]
    fn detects_legal_boilerplate() {
        assert_eq!(matches_non_product_keyword("All Rights Reserved 2024"), Some("legal"));
    }

    #[test]
    fn product_description_does_not_match() {
        assert_eq!(matches_non_product_keyword("The Nova sofa features a solid oak frame"), None);
    }
}
