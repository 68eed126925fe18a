//! Builders for WhatsApp interactive payloads (reply buttons, lists,
//! carousels) with the Cloud API's structural limits enforced.

use serde::Serialize;
use serde_json::{json, Value};

use omnihub_channels::error::{ChannelError, Result};

/// Reply buttons: at most 3, titles capped at 20 characters.
pub const MAX_BUTTONS: usize = 3;
pub const MAX_BUTTON_TITLE: usize = 20;
/// List messages: at most 10 rows per section and 10 sections.
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_LIST_SECTIONS: usize = 10;
/// Carousels carry between 2 and 10 cards.
pub const MIN_CAROUSEL_CARDS: usize = 2;
pub const MAX_CAROUSEL_CARDS: usize = 10;

#[derive(Debug, Clone, Serialize)]
struct Button {
    id: String,
    title: String,
}

/// Builds an `interactive.button` payload.
#[derive(Debug, Default)]
pub struct ButtonsBuilder {
    body: String,
    buttons: Vec<Button>,
}

impl ButtonsBuilder {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            buttons: Vec::new(),
        }
    }

    /// Add one reply button. Titles longer than 20 characters are
    /// truncated; a fourth button is rejected.
    pub fn add_button(&mut self, id: impl Into<String>, title: &str) -> Result<&mut Self> {
        if self.buttons.len() >= MAX_BUTTONS {
            return Err(ChannelError::Validation(format!(
                "interactive messages allow at most {MAX_BUTTONS} buttons"
            )));
        }
        let title: String = title.chars().take(MAX_BUTTON_TITLE).collect();
        self.buttons.push(Button {
            id: id.into(),
            title,
        });
        Ok(self)
    }

    pub fn build(&self) -> Result<Value> {
        if self.buttons.is_empty() {
            return Err(ChannelError::Validation(
                "interactive message needs at least one button".to_string(),
            ));
        }
        let buttons: Vec<Value> = self
            .buttons
            .iter()
            .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
            .collect();
        Ok(json!({
            "type": "button",
            "body": { "text": self.body },
            "action": { "buttons": buttons },
        }))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ListRow {
    id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct ListSection {
    title: String,
    rows: Vec<ListRow>,
}

/// Builds an `interactive.list` payload.
#[derive(Debug)]
pub struct ListBuilder {
    body: String,
    button_label: String,
    sections: Vec<ListSection>,
}

impl ListBuilder {
    pub fn new(body: impl Into<String>, button_label: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            button_label: button_label.into(),
            sections: Vec::new(),
        }
    }

    /// Add a section; rows beyond the per-section cap are truncated.
    pub fn add_section(
        &mut self,
        title: impl Into<String>,
        rows: Vec<(String, String, Option<String>)>,
    ) -> Result<&mut Self> {
        if self.sections.len() >= MAX_LIST_SECTIONS {
            return Err(ChannelError::Validation(format!(
                "list messages allow at most {MAX_LIST_SECTIONS} sections"
            )));
        }
        let rows: Vec<ListRow> = rows
            .into_iter()
            .take(MAX_LIST_ROWS)
            .map(|(id, title, description)| ListRow {
                id,
                title,
                description,
            })
            .collect();
        self.sections.push(ListSection {
            title: title.into(),
            rows,
        });
        Ok(self)
    }

    pub fn build(&self) -> Result<Value> {
        if self.sections.is_empty() {
            return Err(ChannelError::Validation(
                "list message needs at least one section".to_string(),
            ));
        }
        let sections: Vec<Value> = self
            .sections
            .iter()
            .map(|s| {
                json!({
                    "title": s.title,
                    "rows": s.rows,
                })
            })
            .collect();
        Ok(json!({
            "type": "list",
            "body": { "text": self.body },
            "action": { "button": self.button_label, "sections": sections },
        }))
    }
}

/// One card of a carousel.
#[derive(Debug, Clone)]
pub struct CarouselCard {
    pub image_url: String,
    pub body: String,
    /// (id, title) pairs rendered as the card's quick replies.
    pub buttons: Vec<(String, String)>,
}

/// Builds a carousel payload. Requires 2..=10 cards.
#[derive(Debug, Default)]
pub struct CarouselBuilder {
    body: String,
    cards: Vec<CarouselCard>,
}

impl CarouselBuilder {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            cards: Vec::new(),
        }
    }

    pub fn add_card(&mut self, card: CarouselCard) -> &mut Self {
        self.cards.push(card);
        self
    }

    pub fn build(&self) -> Result<Value> {
        if self.cards.len() < MIN_CAROUSEL_CARDS || self.cards.len() > MAX_CAROUSEL_CARDS {
            return Err(ChannelError::Validation(format!(
                "carousel requires {MIN_CAROUSEL_CARDS}..{MAX_CAROUSEL_CARDS} cards, got {}",
                self.cards.len()
            )));
        }
        let cards: Vec<Value> = self
            .cards
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let buttons: Vec<Value> = c
                    .buttons
                    .iter()
                    .map(|(id, title)| {
                        let title: String = title.chars().take(MAX_BUTTON_TITLE).collect();
                        json!({ "type": "reply", "reply": { "id": id, "title": title } })
                    })
                    .collect();
                json!({
                    "card_index": i,
                    "components": {
                        "header": { "type": "image", "image": { "link": c.image_url } },
                        "body": { "text": c.body },
                        "buttons": buttons,
                    },
                })
            })
            .collect();
        Ok(json!({
            "type": "carousel",
            "body": { "text": self.body },
            "action": { "cards": cards },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_titles_truncate_at_twenty_chars() {
        let mut b = ButtonsBuilder::new("Pick one");
        b.add_button("a", "This title is way longer than twenty characters")
            .unwrap();
        let payload = b.build().unwrap();
        let title = payload["action"]["buttons"][0]["reply"]["title"]
            .as_str()
            .unwrap();
        assert_eq!(title.chars().count(), 20);
        assert_eq!(title, "This title is way lo");
    }

    #[test]
    fn fourth_button_is_rejected() {
        let mut b = ButtonsBuilder::new("Pick one");
        b.add_button("a", "A").unwrap();
        b.add_button("b", "B").unwrap();
        b.add_button("c", "C").unwrap();
        let err = b.add_button("d", "D").unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
    }

    #[test]
    fn list_sections_cap_rows_at_ten() {
        let rows: Vec<_> = (0..15)
            .map(|i| (format!("r{i}"), format!("Row {i}"), None))
            .collect();
        let mut b = ListBuilder::new("Choose", "Open");
        b.add_section("Options", rows).unwrap();
        let payload = b.build().unwrap();
        assert_eq!(
            payload["action"]["sections"][0]["rows"].as_array().unwrap().len(),
            MAX_LIST_ROWS
        );
    }

    #[test]
    fn carousel_enforces_card_bounds() {
        let card = CarouselCard {
            image_url: "https://cdn.example.com/1.jpg".to_string(),
            body: "One".to_string(),
            buttons: vec![("b1".to_string(), "Buy".to_string())],
        };

        let mut too_few = CarouselBuilder::new("Catalog");
        too_few.add_card(card.clone());
        assert!(too_few.build().is_err());

        let mut too_many = CarouselBuilder::new("Catalog");
        for _ in 0..11 {
            too_many.add_card(card.clone());
        }
        assert!(too_many.build().is_err());

        let mut ok = CarouselBuilder::new("Catalog");
        ok.add_card(card.clone());
        ok.add_card(card);
        let payload = ok.build().unwrap();
        assert_eq!(payload["action"]["cards"].as_array().unwrap().len(), 2);
    }
}
