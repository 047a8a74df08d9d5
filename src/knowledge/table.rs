//! Built-in knowledge table for Qala Non-Governmental Institute.
//!
//! Entry 0 is the general-information entry returned by the generic
//! institute-name fallback. Order matters: the fallback scan returns the
//! first entry whose pattern occurs in the query.

use super::entry::KnowledgeEntry;

/// Index of the general-information entry.
pub const GENERAL_ENTRY: usize = 0;

pub fn builtin() -> Vec<KnowledgeEntry> {
    vec![
        // general
        KnowledgeEntry::new(
            &[
                "پەیمانگای قەڵای ناحکومی",
                "پەیمانگەی قەڵای ناحکومی",
                "قەڵای ناحکومی",
                "پەیمانگەی قەڵا",
                "پەیمانگای قەڵا",
                "قەڵا",
                "پەیمانگە",
                "ناحکومی",
                "زانیاری قەڵا",
                "قەڵا چییە",
                "دەربارەی پەیمانگەی قەڵا",
                "دەربارەی قەڵا",
                "زانیاری پەیمانگە",
            ],
            r#"✔️پەیمانگەی قـەڵای ناحکومی؛ یەکەم و باشترین و چالاکترین پەیمانگەی ئەهلییە لە سنووری ئیدارەی گەرمیانداو بەشەکانی:
✅ کـارگێڕی و ژمێریاری
✅ گازو پێتڕۆڵ(نـەوت)
✅ کـۆمپیوتـەری هەیە.

هەلی خوێندن بەدەستبێنن لە پەیمانگەی قـەڵای ناحکومی.

بۆ ئەوەی ببنە یەکێک لە خوێندکارانی پەیمانگەکەمان، تەنھا بڕوانامەی 9ی بنەڕەتیتان پێویستە! هەرئێستا سەردانمان بکەن و ناوتان تۆمار بکەن بۆ ئەوەی کورسیەکی خوێندن حجز بکەن.

پەیمانگەی قەڵا؛ بەبێ مەرجی تەمەن و نمرە سەرجەم دەرچووانی ٣ی ناوەندی(٩ی بنەڕەتی)و (١٠، ١١، ١٢)ی ئامادەیی وەردەگرێت و بڕوانامەی دبلۆمی باوەڕپێکراوی وەزارەتی پەروەردەی حکومەتی ھەرێمی کوردستانیان پێدەبەخشێت.
√ کرێی خوێندن بە 6قیست وەردەگیرێت دوای داشکاندن.
√ باڵەخانەی پەیمانگەی قەڵا مۆدێرن و سەردەمیانەیە.

⏰کاتژمێر ٩ی بەیانی تا ٧ی ئێوارەی هەموو ڕۆژێک دەرگای پەیمانگەکەمان کراوەیەو پێشوازیتان لێدەکەین⬇️

☎️07705009002
☎️07702438095
☎️07701925836
🌍 پەیمانگەی قـەڵاـی ناحکومی
کەلار ـ تەنیشت شاری پزیشکی گەرمیان"#,
        )
        .with_links(&["https://www.facebook.com/share/1AH7TPx4T6/"]),
        // departments
        KnowledgeEntry::new(
            &[
                "بەشەکانی پەیمانگە",
                "بەشەکانی قەڵا",
                "خوێندن لە قەڵا",
                "خوێندنی قەڵا",
                "بەشەکان",
                "خوێندن چی هەیە",
                "خوێندنی چی هەیە",
                "بەشەکانی پەیمانگا",
                "بەشەکانی خوێندن",
                "دەتوانم چی بخوێنم",
            ],
            r#"پەیمانگەی قـەڵای ناحکومی ئەم بەشانەی هەیە:
✅ کـارگێڕی و ژمێریاری
✅ گازو پێتڕۆڵ(نـەوت)
✅ کـۆمپیوتـەر

ناونووسی کراوەیە بۆ وەرگرتنی خوێندکاران! تەنها بڕوانامەی ٩ی بنەڕەتی پێویستە."#,
        ),
        // contact
        KnowledgeEntry::new(
            &[
                "پەیوەندی",
                "تەلەفۆن",
                "ژمارەی پەیوەندی",
                "ژمارەی مۆبایل قەڵا",
                "تەلەفۆنی قەڵا",
            ],
            r#"بۆ پەیوەندیکردن بە پەیمانگەی قەڵای ناحکومی:

☎️07705009002
☎️07702438095
☎️07701925836

🌍 ناونیشان: کەلار ـ تەنیشت شاری پزیشکی گەرمیان"#,
        ),
        // opening hours
        KnowledgeEntry::new(
            &[
                "کاتی دەوام",
                "کاتژمێری دەوام",
                "کەی کراوەیە",
            ],
            r#"⏰کاتژمێر ٩ی بەیانی تا ٧ی ئێوارەی هەموو ڕۆژێک دەرگای پەیمانگەکەمان کراوەیەو پێشوازیتان لێدەکەین"#,
        ),
        // tuition
        KnowledgeEntry::new(
            &[
                "کرێی خوێندن",
                "پارەی خوێندن",
                "نرخی خوێندن",
            ],
            r#"کرێی خوێندن لە پەیمانگەی قەڵای ناحکومی بە ٦ قیست وەردەگیرێت دوای داشکاندن.

بۆ زانیاری زیاتر دەربارەی نرخەکان، تکایە پەیوەندی بکەن بە:
☎️07705009002
☎️07702438095
☎️07701925836"#,
        ),
        // location
        KnowledgeEntry::new(
            &[
                "شوێن",
                "ناونیشان",
                "لە کوێیە",
                "ئەدرەس",
            ],
            r#"🌍 پەیمانگەی قـەڵاـی ناحکومی
کەلار ـ تەنیشت شاری پزیشکی گەرمیان"#,
        ),
        // computer department
        KnowledgeEntry::new(
            &[
                "کۆمپیوتەر",
                "بەشی کۆمپیوتەر",
                "خوێندنی کۆمپیوتەر",
                "زانیاری بەشی کۆمپیوتەر",
                "ای تی",
                "IT",
                "کۆمپیوتەر چییە",
            ],
            r#"بەشی کۆمپیوتەر لە پەیمانگەی قەڵای ناحکومی:

✅ بەشی کۆمپیوتەر لە پەیمانگەی قەڵا دەرفەتێکی باشە بۆ فێربوونی تەکنەلۆجیای سەردەم.
✅ خوێندکاران فێری پڕۆگرامینگ، نێتۆرک، وێبسایت، هاردوێر، و سۆفتوێر دەبن.
✅ بڕوانامەی دبلۆمی باوەڕپێکراوی وەزارەتی پەروەردەی هەرێمی کوردستان بەدەست دەهێنن.

بۆ زانیاری زیاتر پەیوەندی بکەن بە:
☎️07705009002
"#,
        ),
        // administration and accounting department
        KnowledgeEntry::new(
            &[
                "ژمێریاری",
                "کارگێری",
                "کارگێڕی",
                "بەشی کارگێڕی",
                "بەشی ژمێریاری",
                "خوێندنی کارگێڕی",
                "خوێندنی ژمێریاری",
                "ئیدارە",
            ],
            r#"بەشی کارگێڕی و ژمێریاری لە پەیمانگەی قەڵای ناحکومی:

✅ بەشی کارگێڕی و ژمێریاری دەرفەتێکی گرنگە بۆ فێربوونی بەڕێوەبردن و دارایی.
✅ خوێندکاران فێری سیستەمی ژمێریاری، بەڕێوەبردنی دارایی، پلاندانانی کارگێڕی و چەندین بابەتی گرنگی تر دەبن.
✅ بڕوانامەی دبلۆمی باوەڕپێکراوی وەزارەتی پەروەردەی هەرێمی کوردستان بەدەست دەهێنن.

بۆ زانیاری زیاتر پەیوەندی بکەن بە:
☎️07705009002
"#,
        ),
        // gas and petroleum department
        KnowledgeEntry::new(
            &[
                "نەوت",
                "پیترۆڵ",
                "پێتڕۆڵ",
                "گاز",
                "بەشی نەوت",
                "بەشی گاز",
                "بەشی پێتڕۆڵ",
                "خوێندنی نەوت",
            ],
            r#"بەشی گاز و پێتڕۆڵ (نەوت) لە پەیمانگەی قەڵای ناحکومی:

✅ بەشی گاز و پێتڕۆڵ یەکێکە لە بەشە گرنگەکانی پەیمانگەی قەڵا.
✅ خوێندکاران فێری تەکنەلۆجیای نەوت و گاز، دۆزینەوە، بەرهەمهێنان و چەندین بابەتی پەیوەندیدار دەبن.
✅ بڕوانامەی دبلۆمی باوەڕپێکراوی وەزارەتی پەروەردەی هەرێمی کوردستان بەدەست دەهێنن.

بۆ زانیاری زیاتر پەیوەندی بکەن بە:
☎️07705009002
"#,
        ),
        // admission requirements
        KnowledgeEntry::new(
            &[
                "مەرجەکانی وەرگرتن",
                "پێداویستیەکانی وەرگرتن",
                "چۆن وەردەگیرێم",
            ],
            r#"مەرجەکانی وەرگرتن لە پەیمانگەی قەڵای ناحکومی:

پەیمانگەی قەڵا؛ بەبێ مەرجی تەمەن و نمرە سەرجەم دەرچووانی ٣ی ناوەندی(٩ی بنەڕەتی)و (١٠، ١١، ١٢)ی ئامادەیی وەردەگرێت و بڕوانامەی دبلۆمی باوەڕپێکراوی وەزارەتی پەروەردەی حکومەتی ھەرێمی کوردستانیان پێدەبەخشێت.

تەنها بڕوانامەی ٩ی بنەڕەتیتان پێویستە!"#,
        ),
        // social media
        KnowledgeEntry::new(
            &[
                "فەیسبووک",
                "سۆشیال میدیا",
                "لینک",
                "پەیج",
            ],
            r#"پەڕەی فەیسبووکی پەیمانگەی قەڵا:
https://www.facebook.com/share/1AH7TPx4T6/"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_shape() {
        let table = builtin();
        assert_eq!(table.len(), 11);
        assert!(table.iter().all(|e| !e.patterns.is_empty() && !e.response.trim().is_empty()));
        assert_eq!(table[GENERAL_ENTRY].links(), ["https://www.facebook.com/share/1AH7TPx4T6/"]);
    }

    #[test]
    fn test_contact_entry_lists_three_phone_numbers() {
        let contact = &builtin()[2];
        assert_eq!(contact.canonical_pattern(), Some("پەیوەندی"));
        let phones = contact.response.lines().filter(|l| l.starts_with("☎️")).count();
        assert_eq!(phones, 3);
    }
}
