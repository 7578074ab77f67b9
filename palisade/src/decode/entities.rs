// palisade/src/decode/entities.rs
//
// Named HTML character references recognized by the unescape pipeline.
// Sorted by name; the decoder walks candidates with longest-match wins.

pub struct HtmlEntity {
    pub name:  &'static str,
    pub value: u16,
}

pub const HTML_ENTITIES: &[HtmlEntity] = &[
    HtmlEntity { name: "AElig",   value: 0x00C6 },
    HtmlEntity { name: "Aacute",  value: 0x00C1 },
    HtmlEntity { name: "Acirc",   value: 0x00C2 },
    HtmlEntity { name: "Agrave",  value: 0x00C0 },
    HtmlEntity { name: "Aring",   value: 0x00C5 },
    HtmlEntity { name: "Atilde",  value: 0x00C3 },
    HtmlEntity { name: "Auml",    value: 0x00C4 },
    HtmlEntity { name: "Ccedil",  value: 0x00C7 },
    HtmlEntity { name: "Dagger",  value: 0x2021 },
    HtmlEntity { name: "Eacute",  value: 0x00C9 },
    HtmlEntity { name: "Ecirc",   value: 0x00CA },
    HtmlEntity { name: "Egrave",  value: 0x00C8 },
    HtmlEntity { name: "Euml",    value: 0x00CB },
    HtmlEntity { name: "Iacute",  value: 0x00CD },
    HtmlEntity { name: "Icirc",   value: 0x00CE },
    HtmlEntity { name: "Igrave",  value: 0x00CC },
    HtmlEntity { name: "Iuml",    value: 0x00CF },
    HtmlEntity { name: "Ntilde",  value: 0x00D1 },
    HtmlEntity { name: "Oacute",  value: 0x00D3 },
    HtmlEntity { name: "Ocirc",   value: 0x00D4 },
    HtmlEntity { name: "Ograve",  value: 0x00D2 },
    HtmlEntity { name: "Oslash",  value: 0x00D8 },
    HtmlEntity { name: "Otilde",  value: 0x00D5 },
    HtmlEntity { name: "Ouml",    value: 0x00D6 },
    HtmlEntity { name: "Uacute",  value: 0x00DA },
    HtmlEntity { name: "Ucirc",   value: 0x00DB },
    HtmlEntity { name: "Ugrave",  value: 0x00D9 },
    HtmlEntity { name: "Uuml",    value: 0x00DC },
    HtmlEntity { name: "Yacute",  value: 0x00DD },
    HtmlEntity { name: "aacute",  value: 0x00E1 },
    HtmlEntity { name: "acirc",   value: 0x00E2 },
    HtmlEntity { name: "acute",   value: 0x00B4 },
    HtmlEntity { name: "aelig",   value: 0x00E6 },
    HtmlEntity { name: "agrave",  value: 0x00E0 },
    HtmlEntity { name: "amp",     value: 0x0026 },
    HtmlEntity { name: "apos",    value: 0x0027 },
    HtmlEntity { name: "aring",   value: 0x00E5 },
    HtmlEntity { name: "atilde",  value: 0x00E3 },
    HtmlEntity { name: "auml",    value: 0x00E4 },
    HtmlEntity { name: "bdquo",   value: 0x201E },
    HtmlEntity { name: "brvbar",  value: 0x00A6 },
    HtmlEntity { name: "bull",    value: 0x2022 },
    HtmlEntity { name: "ccedil",  value: 0x00E7 },
    HtmlEntity { name: "cedil",   value: 0x00B8 },
    HtmlEntity { name: "cent",    value: 0x00A2 },
    HtmlEntity { name: "circ",    value: 0x02C6 },
    HtmlEntity { name: "copy",    value: 0x00A9 },
    HtmlEntity { name: "curren",  value: 0x00A4 },
    HtmlEntity { name: "dagger",  value: 0x2020 },
    HtmlEntity { name: "deg",     value: 0x00B0 },
    HtmlEntity { name: "divide",  value: 0x00F7 },
    HtmlEntity { name: "eacute",  value: 0x00E9 },
    HtmlEntity { name: "ecirc",   value: 0x00EA },
    HtmlEntity { name: "egrave",  value: 0x00E8 },
    HtmlEntity { name: "emsp",    value: 0x2003 },
    HtmlEntity { name: "ensp",    value: 0x2002 },
    HtmlEntity { name: "eth",     value: 0x00F0 },
    HtmlEntity { name: "euml",    value: 0x00EB },
    HtmlEntity { name: "euro",    value: 0x20AC },
    HtmlEntity { name: "frac12",  value: 0x00BD },
    HtmlEntity { name: "frac14",  value: 0x00BC },
    HtmlEntity { name: "frac34",  value: 0x00BE },
    HtmlEntity { name: "gt",      value: 0x003E },
    HtmlEntity { name: "hellip",  value: 0x2026 },
    HtmlEntity { name: "iacute",  value: 0x00ED },
    HtmlEntity { name: "icirc",   value: 0x00EE },
    HtmlEntity { name: "iexcl",   value: 0x00A1 },
    HtmlEntity { name: "igrave",  value: 0x00EC },
    HtmlEntity { name: "iquest",  value: 0x00BF },
    HtmlEntity { name: "iuml",    value: 0x00EF },
    HtmlEntity { name: "laquo",   value: 0x00AB },
    HtmlEntity { name: "ldquo",   value: 0x201C },
    HtmlEntity { name: "lsaquo",  value: 0x2039 },
    HtmlEntity { name: "lsquo",   value: 0x2018 },
    HtmlEntity { name: "lt",      value: 0x003C },
    HtmlEntity { name: "macr",    value: 0x00AF },
    HtmlEntity { name: "mdash",   value: 0x2014 },
    HtmlEntity { name: "micro",   value: 0x00B5 },
    HtmlEntity { name: "middot",  value: 0x00B7 },
    HtmlEntity { name: "nbsp",    value: 0x00A0 },
    HtmlEntity { name: "ndash",   value: 0x2013 },
    HtmlEntity { name: "not",     value: 0x00AC },
    HtmlEntity { name: "ntilde",  value: 0x00F1 },
    HtmlEntity { name: "oacute",  value: 0x00F3 },
    HtmlEntity { name: "ocirc",   value: 0x00F4 },
    HtmlEntity { name: "ograve",  value: 0x00F2 },
    HtmlEntity { name: "ordf",    value: 0x00AA },
    HtmlEntity { name: "ordm",    value: 0x00BA },
    HtmlEntity { name: "oslash",  value: 0x00F8 },
    HtmlEntity { name: "otilde",  value: 0x00F5 },
    HtmlEntity { name: "ouml",    value: 0x00F6 },
    HtmlEntity { name: "para",    value: 0x00B6 },
    HtmlEntity { name: "permil",  value: 0x2030 },
    HtmlEntity { name: "plusmn",  value: 0x00B1 },
    HtmlEntity { name: "pound",   value: 0x00A3 },
    HtmlEntity { name: "quot",    value: 0x0022 },
    HtmlEntity { name: "raquo",   value: 0x00BB },
    HtmlEntity { name: "rdquo",   value: 0x201D },
    HtmlEntity { name: "reg",     value: 0x00AE },
    HtmlEntity { name: "rsaquo",  value: 0x203A },
    HtmlEntity { name: "rsquo",   value: 0x2019 },
    HtmlEntity { name: "sbquo",   value: 0x201A },
    HtmlEntity { name: "sect",    value: 0x00A7 },
    HtmlEntity { name: "shy",     value: 0x00AD },
    HtmlEntity { name: "sup1",    value: 0x00B9 },
    HtmlEntity { name: "sup2",    value: 0x00B2 },
    HtmlEntity { name: "sup3",    value: 0x00B3 },
    HtmlEntity { name: "szlig",   value: 0x00DF },
    HtmlEntity { name: "thinsp",  value: 0x2009 },
    HtmlEntity { name: "thorn",   value: 0x00FE },
    HtmlEntity { name: "tilde",   value: 0x02DC },
    HtmlEntity { name: "times",   value: 0x00D7 },
    HtmlEntity { name: "trade",   value: 0x2122 },
    HtmlEntity { name: "uacute",  value: 0x00FA },
    HtmlEntity { name: "ucirc",   value: 0x00FB },
    HtmlEntity { name: "ugrave",  value: 0x00F9 },
    HtmlEntity { name: "uml",     value: 0x00A8 },
    HtmlEntity { name: "uuml",    value: 0x00FC },
    HtmlEntity { name: "yacute",  value: 0x00FD },
    HtmlEntity { name: "yen",     value: 0x00A5 },
    HtmlEntity { name: "yuml",    value: 0x00FF },
];
