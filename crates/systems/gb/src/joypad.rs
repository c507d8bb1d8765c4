//! Joypad matrix (`$FF00`, P1).
//!
//! - Bit 5: select action buttons (0 = selected)
//! - Bit 4: select direction pad (0 = selected)
//! - Bits 3-0: input lines, 0 = pressed

/// The eight logical inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit in the pressed mask: 0-3 direction pad, 4-7 action buttons
    pub fn bit(self) -> u8 {
        match self {
            Button::Right => 0x01,
            Button::Left => 0x02,
            Button::Up => 0x04,
            Button::Down => 0x08,
            Button::A => 0x10,
            Button::B => 0x20,
            Button::Select => 0x40,
            Button::Start => 0x80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joypad {
    /// P1 bits 4-5 as last written
    select: u8,
    /// 1 = held
    pressed: u8,
}

impl Default for Joypad {
    fn default() -> Self {
        Self {
            select: 0x30,
            pressed: 0,
        }
    }
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the button was not already held.
    pub fn press(&mut self, button: Button) -> bool {
        let newly = self.pressed & button.bit() == 0;
        self.pressed |= button.bit();
        newly
    }

    pub fn release(&mut self, button: Button) {
        self.pressed &= !button.bit();
    }

    pub fn read(&self) -> u8 {
        let mut lines = 0;
        if self.select & 0x10 == 0 {
            lines |= self.pressed & 0x0F;
        }
        if self.select & 0x20 == 0 {
            lines |= self.pressed >> 4;
        }
        0xC0 | self.select | (!lines & 0x0F)
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }

    pub fn pressed_mask(&self) -> u8 {
        self.pressed
    }

    pub fn set_pressed_mask(&mut self, mask: u8) {
        self.pressed = mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_selected_reads_released() {
        let mut pad = Joypad::new();
        pad.press(Button::A);
        assert_eq!(pad.read(), 0xFF);
    }

    #[test]
    fn matrix_rows() {
        let mut pad = Joypad::new();
        pad.press(Button::Start);
        pad.press(Button::Left);

        pad.write(0x20); // direction pad
        assert_eq!(pad.read(), 0xE0 | 0x0D);

        pad.write(0x10); // action buttons
        assert_eq!(pad.read(), 0xD0 | 0x07);

        pad.release(Button::Start);
        assert_eq!(pad.read(), 0xDF);
    }

    #[test]
    fn press_reports_edges() {
        let mut pad = Joypad::new();
        assert!(pad.press(Button::B));
        assert!(!pad.press(Button::B));
        pad.release(Button::B);
        assert!(pad.press(Button::B));
    }
}
