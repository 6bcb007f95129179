use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        pub(crate) static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Faction page
selector!(FACTION_BLOCKS, "h1, h2, h3, h4, p, div.str10Wrap, div.enhWrap");
selector!(DATASHEET_LINK, "a[href*='/datasheets/']");
selector!(STRAT_NAME, ".str10Name");
selector!(STRAT_CP, ".str10CP");
selector!(STRAT_TYPE, ".str10Type");
selector!(STRAT_TEXT, ".str10Text");
selector!(ENH_NAME, ".enhName");
selector!(ENH_COST, ".enhCost");
selector!(ENH_TEXT, ".enhText");
regex!(CP_COST, r"(\d+)\s*CP");
regex!(POINTS_COST, r"(?i)(\d+)\s*(?:pts|points)?");
regex!(TYPE_SEPARATOR, r"\s+[–—-]\s+");
regex!(STRAT_LABEL, r"(WHEN|TARGET|EFFECT|RESTRICTIONS):");
regex!(PHASE, r"(?i)\b(command|movement|shooting|charge|fight|any)\s+phase\b");

// Unit datasheet
selector!(UNIT_NAME, ".dsH2Header, h1");
selector!(CHAR_WRAP, ".dsCharWrap");
selector!(CHAR_NAME, ".dsCharName");
selector!(CHAR_VALUE, ".dsCharValue");
selector!(CHAR_INVUL, ".dsCharInvulValue");
selector!(WEAPON_TABLE, "table.wTable");
selector!(ROW, "tr");
selector!(CELL, "td");
selector!(ABILITY_BLOCK, ".dsAbility");
selector!(BOLD, "b");
selector!(KEYWORDS, ".dsKeywords");
selector!(FACTION_KEYWORDS, ".dsFactionKeywords");
selector!(COMPOSITION, ".dsComposition");
selector!(POINTS_ROWS, "table.dsPoints tr");
